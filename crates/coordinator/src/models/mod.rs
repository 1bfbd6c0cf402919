//! Core entities of the marketplace: contracts, proposals, tasks, claims,
//! submissions and the peer-sync escort record.

pub mod claim;
pub mod contract;
pub mod filter;
pub mod proposal;
pub mod submission;
pub mod task;

pub use claim::{Claim, ClaimStatus};
pub use contract::{Contract, ContractStatus};
pub use filter::{ContractFilter, TaskFilter};
pub use proposal::{metadata_keys, Proposal, ProposalStatus};
pub use submission::{EscortStatus, Submission, SubmissionStatus};
pub use task::{ConfirmationStatus, MerkleProof, Task, TaskStatus};
