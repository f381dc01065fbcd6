mod hf_global;
mod lf_global;
mod lf_group;
mod pass_group;

pub use hf_global::{HfGlobal, HfGlobalParams};
pub use lf_global::{GlobalModular, LfGlobal, LfGlobalParams, LfGlobalVarDct};
pub use lf_group::{LfCoeff, LfGroup, LfGroupParams};
pub use pass_group::{decode_pass_group, PassGroupParams, PassGroupVarDct};
