//! Region-overlap loss functions for segmentation training.
//!
//! Every loss takes `(y_true, y_pred)` of identical `[N, C, H, W]` shape
//! and returns a batch-reduced scalar to minimize. Shape mismatches are
//! not validated here; they surface as backend errors at call time.
//! Division by zero is preempted per-loss with smoothing constants or
//! finite-value masking.

pub mod combo;
pub mod dice;
pub mod focal_tversky;
pub mod generalized_dice;
pub mod jaccard;
pub mod unified_focal;

pub use combo::{ComboLoss, ComboLossConfig};
pub use dice::{DiceLoss, DiceLossConfig};
pub use focal_tversky::{FocalTverskyLoss, FocalTverskyLossConfig};
pub use generalized_dice::{GeneralizedDiceLoss, GeneralizedDiceLossConfig};
pub use jaccard::{JaccardLoss, JaccardLossConfig};
pub use unified_focal::{AsymUnifiedFocalLoss, AsymUnifiedFocalLossConfig};
