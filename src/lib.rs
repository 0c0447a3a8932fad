// Copyright 2024-present, the blockscan contributors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # blockscan
//!
//! Batch parser and analysis engine for the Bitcoin block-chain as persisted
//! by the reference client: the append-only `blk*.dat` container files. The
//! engine scans those files for block headers, reconstructs the canonical
//! main chain, resolves every transaction input back to the output it
//! spends, aggregates per-address ledgers, and emits time-bucketed
//! statistics about the address population.
//!
//! The pipeline is strictly single-threaded and read-only with respect to
//! the container files. Primitive pieces (hashing, Base58Check, the bounds
//! checked little-endian reader) live in the `blockscan-support` crate.

pub mod arena;
pub mod block;
pub mod chain;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod logging;
pub mod options;
pub mod report;
pub mod scan;
pub mod stats;
pub mod subcommand;
pub mod txindex;
