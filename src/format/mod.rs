//! Container format parsers.
//!
//! Two sibling parsers feed the same tile/level contract upward to
//! [`crate::slide::Slide`]:
//!
//! - [`mod@sis_ets`] — the proprietary SIS+ETS binary headers.
//! - [`mod@ome`] — the OME-TIFF sidecar, built on the generic [`mod@tiff`]
//!   directory-chain reader.
//!
//! [`codecs`] holds the abstract pixel-decoder collaborators that both
//! paths dispatch to by compression code.

pub mod codecs;
pub mod ome;
pub mod sis_ets;
pub mod tiff;
