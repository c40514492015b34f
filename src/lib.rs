#![allow(clippy::arithmetic_side_effects)]
//! The cluster replicated data store.
//!
//! Every node in the cluster keeps a table of the signed gossip values it
//! has heard about; push messages, pull requests and pull responses all
//! read or write this table. The store resolves conflicting assertions of
//! the same fact deterministically (latest wallclock wins, then the larger
//! value hash), hands out insertion-ordered scans so services can tail new
//! votes or epoch slots, and indexes value hashes by their leading bits so
//! pull responses can be assembled without walking the whole table.

#[macro_use]
pub mod contact_info;
pub mod crds;
pub mod crds_shards;
pub mod crds_store;
pub mod crds_value;
mod deprecated;
pub mod duplicate_shred;
pub mod epoch_slots;
pub mod purged_queue;

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;
