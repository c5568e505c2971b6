//! Withdrawal & transfer processor
//!
//! ```text
//! request ──gate──► Pending ──approve──► Approved ──settle──► Completed
//!                      │                     └──────fail────► Failed   (refund)
//!                      ├──reject──► Rejected (refund)
//!                      └──cancel──► Cancelled (refund)
//! ```
//!
//! Transfers complete directly on approval.

pub mod fees;
pub mod requests;
pub mod types;

pub use fees::{FeeQuote, FeeSchedule};
pub use requests::RequestProcessor;
pub use types::{
    RequestId, RequestStatus, TransferForm, TransferOrder, TransferRequest, TransferTarget,
    WithdrawalForm, WithdrawalKind, WithdrawalOrder, WithdrawalRequest,
};
