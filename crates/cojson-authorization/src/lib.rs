//! # cojson-authorization
//!
//! The Group/Account permission model (§4.5): roles, key-epoch tracking,
//! parent-group inheritance, and invite redemption. Operates on a folded
//! view of a group's CoMap content supplied by `cojson-journal`, rather than
//! depending on the journal crate directly, to keep the dependency edge
//! one-directional (journal consults authorization, not the reverse).

#![forbid(unsafe_code)]

pub mod epoch;
pub mod group;
pub mod invite;
pub mod principal;
pub mod role;

pub use epoch::{rotate_key_changes, seal_key_for_member, unseal_key_for_member, SealedKeyBlob};
pub use group::{direct_effective_role, effective_role_with_inheritance, fold_group, GroupEntry, GroupFold};
pub use invite::{recognize_invite_redemption, GroupChange};
pub use principal::{GroupKey, Principal};
pub use role::Role;
