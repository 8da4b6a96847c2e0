mod layout;
mod picker;
mod state;
mod verifier;

pub use layout::PieceLayout;
pub use picker::{BlockPicker, BlockRef};
pub use state::DownloadState;
pub use verifier::PieceVerifier;
