//! Colour encoding headers and colour transforms for jxl-hematite.

pub mod header;
pub mod icc;
pub mod tf;
pub mod xyb;

pub use header::{
    ColourEncoding, ColourSpace, Customxy, OpsinInverseMatrix, Primaries, RenderingIntent,
    ToneMapping, TransferFunction, WhitePoint,
};
