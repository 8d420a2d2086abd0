//! Container discovery.
//!
//! Given a user-supplied path, classify it into one of the containers the
//! rest of the crate knows how to open: a raw `.ets` file, an OME-TIFF
//! `.tif` sidecar, or a `.vsi` marker file that must be resolved to one of
//! the two by walking its sidecar directory. Resolution never parses tile
//! data; it only reads enough bytes to confirm a container's identity.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::DiscoveryError;
use crate::format::ome::experimenter_username;

/// The vendor sentinel that marks a bare `.tif` as an Olympus OME-TIFF
/// sidecar, rather than an arbitrary TIFF a caller happened to point us at.
const OME_EXPERIMENTER_SENTINEL: &str = "olympus";

/// The result of classifying a path: either a directly-openable container,
/// or rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerKind {
    /// A `.vsi` marker file, resolved to its sidecar container.
    Vsi {
        /// Path to the resolved `frame_t.*` sidecar file.
        sidecar_path: PathBuf,
        /// The sidecar's own kind (never `Vsi` or `Rejected`).
        sidecar_kind: Box<ContainerKind>,
    },
    /// A raw SIS+ETS container, openable directly.
    Ets(PathBuf),
    /// An OME-TIFF sidecar, openable directly.
    Tif(PathBuf),
    /// The path does not match any recognized container.
    Rejected,
}

async fn read_magic(path: &Path, len: usize) -> Result<Vec<u8>, DiscoveryError> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| DiscoveryError::Io(e.into()))?;
    if bytes.len() < len {
        return Err(DiscoveryError::BadMagic {
            expected: "enough bytes for a magic check",
            found: format!("{} bytes", bytes.len()),
        });
    }
    Ok(bytes[..len].to_vec())
}

/// Confirm `path` looks like a SIS-wrapped ETS container: the first four
/// bytes must be the SIS magic, since every `.ets` sidecar this crate reads
/// carries the SIS header wrapping the ETS header (see `format::sis_ets`).
async fn confirm_ets_magic(path: &Path) -> Result<(), DiscoveryError> {
    let magic = read_magic(path, 4).await?;
    if magic != b"SIS0" {
        return Err(DiscoveryError::BadMagic {
            expected: "SIS0",
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    Ok(())
}

/// Classic-TIFF or BigTIFF magic test: "II"/"MM" followed by version 42/43.
async fn passes_tiff_magic_test(path: &Path) -> Result<bool, DiscoveryError> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| DiscoveryError::Io(e.into()))?;
    if bytes.len() < 4 {
        return Ok(false);
    }
    let byte_order_ok = &bytes[0..2] == b"II" || &bytes[0..2] == b"MM";
    if !byte_order_ok {
        return Ok(false);
    }
    let little = &bytes[0..2] == b"II";
    let version = if little {
        u16::from_le_bytes([bytes[2], bytes[3]])
    } else {
        u16::from_be_bytes([bytes[2], bytes[3]])
    };
    Ok(version == 42 || version == 43)
}

async fn read_image_description_xml(path: &Path) -> Result<Option<String>, DiscoveryError> {
    let file_size = fs::metadata(path)
        .await
        .map_err(|e| DiscoveryError::Io(e.into()))?
        .len();
    let bytes = fs::read(path)
        .await
        .map_err(|e| DiscoveryError::Io(e.into()))?;

    let header = crate::format::tiff::TiffHeader::parse(&bytes, file_size)
        .map_err(|_| DiscoveryError::Unsupported {
            reason: "failed to parse TIFF header while looking for ImageDescription".to_string(),
        })?;
    let count_size = header.ifd_count_size();
    let offset = header.first_ifd_offset as usize;
    if offset + count_size > bytes.len() {
        return Ok(None);
    }
    let entry_count = if header.is_bigtiff {
        header.byte_order.read_u64(&bytes[offset..offset + count_size])
    } else {
        header.byte_order.read_u16(&bytes[offset..offset + count_size]) as u64
    };
    let entry_size = header.ifd_entry_size();
    let next_offset_size = header.ifd_next_offset_size();
    let table_end = offset + count_size + entry_count as usize * entry_size + next_offset_size;
    if table_end > bytes.len() {
        return Ok(None);
    }
    let ifd_bytes = &bytes[offset..table_end];
    let ifd = crate::format::tiff::Ifd::parse(ifd_bytes, &header)
        .map_err(|_| DiscoveryError::Unsupported {
            reason: "failed to parse first IFD while looking for ImageDescription".to_string(),
        })?;

    let Some(entry) = ifd.find(crate::format::tiff::TiffTag::ImageDescription) else {
        return Ok(None);
    };

    if entry.is_inline {
        return Ok(Some(
            String::from_utf8_lossy(&entry.value_offset_bytes)
                .trim_end_matches('\0')
                .to_string(),
        ));
    }

    let value_offset = entry.value_offset(header.byte_order) as usize;
    let Some(byte_len) = entry.value_byte_size() else {
        return Ok(None);
    };
    let byte_len = byte_len as usize;
    if value_offset + byte_len > bytes.len() {
        return Ok(None);
    }
    Ok(Some(
        String::from_utf8_lossy(&bytes[value_offset..value_offset + byte_len])
            .trim_end_matches('\0')
            .to_string(),
    ))
}

/// Classify `.tif`: pass the TIFF magic test, then require the
/// `ImageDescription` tag to carry OME XML whose `Experimenter` username is
/// the Olympus sentinel.
async fn classify_tif(path: &Path) -> Result<ContainerKind, DiscoveryError> {
    if !passes_tiff_magic_test(path).await? {
        return Err(DiscoveryError::BadMagic {
            expected: "II*\\0 or MM\\0*",
            found: "non-TIFF header".to_string(),
        });
    }

    let Some(xml) = read_image_description_xml(path).await? else {
        return Err(DiscoveryError::Unsupported {
            reason: "ImageDescription tag missing or unreadable".to_string(),
        });
    };

    match experimenter_username(&xml) {
        Some(username) if username == OME_EXPERIMENTER_SENTINEL => {
            Ok(ContainerKind::Tif(path.to_path_buf()))
        }
        _ => Err(DiscoveryError::Unsupported {
            reason: "OME XML present but experimenter username is not the Olympus sentinel"
                .to_string(),
        }),
    }
}

/// Find the first `frame_t*` file directly inside `stack_dir`, in sorted
/// (lowest-numbered) order.
async fn find_frame_file(stack_dir: &Path) -> Result<Option<PathBuf>, DiscoveryError> {
    let mut frame_entries = Vec::new();
    let mut read_dir = fs::read_dir(stack_dir)
        .await
        .map_err(|e| DiscoveryError::Io(e.into()))?;
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| DiscoveryError::Io(e.into()))?
    {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with("frame_t") {
            frame_entries.push(entry.path());
        }
    }
    frame_entries.sort();
    Ok(frame_entries.into_iter().next())
}

/// Classify a resolved `frame_t.*` sidecar file by its extension.
async fn classify_frame_file(frame_path: &Path) -> Result<ContainerKind, DiscoveryError> {
    match frame_path.extension().and_then(|e| e.to_str()) {
        Some("ets") => {
            confirm_ets_magic(frame_path).await?;
            Ok(ContainerKind::Ets(frame_path.to_path_buf()))
        }
        Some("tif") => classify_tif(frame_path).await,
        _ => Err(DiscoveryError::Unsupported {
            reason: format!("sidecar {} has an unrecognized extension", frame_path.display()),
        }),
    }
}

/// Resolve a `.vsi` marker file to its sidecar container:
/// `<parent>/_<stem>_/stack1*/frame_t.*`.
///
/// Stack directories are tried in sorted (numerically lowest first) order;
/// a stack directory that has no `frame_t` file, or whose `frame_t` file
/// fails magic/format detection, is skipped in favor of the next one, per
/// "any stack that passes detection wins".
async fn resolve_vsi_sidecar(path: &Path) -> Result<ContainerKind, DiscoveryError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| DiscoveryError::NotFound(path.display().to_string()))?;

    let sidecar_dir = parent.join(format!("_{stem}_"));
    let mut read_dir = fs::read_dir(&sidecar_dir)
        .await
        .map_err(|_| DiscoveryError::NotFound(sidecar_dir.display().to_string()))?;

    let mut stack_dirs = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| DiscoveryError::Io(e.into()))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("stack1") && entry.path().is_dir() {
            stack_dirs.push(entry.path());
        }
    }
    stack_dirs.sort();

    if stack_dirs.is_empty() {
        return Err(DiscoveryError::NotFound(format!("{}/stack1*", sidecar_dir.display())));
    }

    let mut last_error = None;
    for stack_dir in &stack_dirs {
        let Some(frame_path) = find_frame_file(stack_dir).await? else {
            last_error = Some(DiscoveryError::NotFound(format!("{}/frame_t.*", stack_dir.display())));
            continue;
        };
        match classify_frame_file(&frame_path).await {
            Ok(sidecar_kind) => {
                return Ok(ContainerKind::Vsi {
                    sidecar_path: frame_path,
                    sidecar_kind: Box::new(sidecar_kind),
                })
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| DiscoveryError::NotFound(sidecar_dir.display().to_string())))
}

/// Classify `path` into a [`ContainerKind`], per the rules:
///
/// 1. `.ets` with SIS magic → `Ets`.
/// 2. `.tif` passing the TIFF magic test, with an OME `ImageDescription`
///    whose experimenter username is `"olympus"` → `Tif`.
/// 3. `.vsi` → resolve the sidecar directory and recurse into its `.ets`/`.tif`.
/// 4. Anything else → `Rejected`.
pub async fn classify(path: impl AsRef<Path>) -> Result<ContainerKind, DiscoveryError> {
    let path = path.as_ref();

    if !fs::try_exists(path)
        .await
        .map_err(|e| DiscoveryError::Io(e.into()))?
    {
        return Err(DiscoveryError::NotFound(path.display().to_string()));
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some("ets") => {
            confirm_ets_magic(path).await?;
            Ok(ContainerKind::Ets(path.to_path_buf()))
        }
        Some("tif") => classify_tif(path).await,
        Some("vsi") => resolve_vsi_sidecar(path).await,
        _ => Ok(ContainerKind::Rejected),
    }
}
