//! Chain state: the layered coin/sidechain cache and the sidechain
//! lifecycle engine that drives it.

pub mod cache;
pub mod coins;
pub mod events;
pub mod lifecycle;
pub mod sidechains;
pub mod undo;
pub mod view;

pub use cache::CoinsViewCache;
pub use coins::Coin;
pub use events::SidechainEvents;
pub use lifecycle::{
    check_tx_against_forks, SidechainError, SidechainInspector, SidechainStateQuery,
};
pub use sidechains::{ActiveCertView, Sidechain, SidechainState};
pub use undo::{CeasedSidechainUndo, CertificateUndo, SidechainEventsUndo};
pub use view::{CacheFlushData, CoinsView, CoinsViewDb, CswNullifierKey, ViewError};
