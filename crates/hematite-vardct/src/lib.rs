//! VarDCT frame data for jxl-hematite: varblock metadata, coefficient
//! orders, HF coefficient decoding and dequantization matrices.

mod dct_select;
mod dequant;
mod error;
mod hf_coeff;
mod hf_metadata;
mod hf_pass;
mod lf;

pub use dct_select::TransformType;
pub use dequant::{DequantMatrix, DequantMatrixSet, DequantMatrixSetParams};
pub use error::{Error, Result};
pub use hf_coeff::{decode_hf_coeff, HfCoeffParams};
pub use hf_metadata::{BlockInfo, HfMetadata, HfMetadataParams};
pub use hf_pass::{HfPass, HfPassParams};
pub use lf::{HfBlockContext, LfChannelCorrelation, LfChannelDequantization, Quantizer};
