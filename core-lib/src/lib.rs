// Copyright 2018 The dirwatch Authors.
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

//! The main library for the dirwatch daemon.
//!
//! Everything that gives audit records meaning lives here: the path
//! model, the per-event accumulator, the tree of installed watches, and
//! the pipeline that ties them to an output log. The wire itself (record
//! grammar, rule format, netlink) lives in the `dirwatch-audit` crate.

#[macro_use]
extern crate serde_derive;

pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod paths;
pub mod watch;

pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::handler::EventHandler;
pub use crate::watch::SourceRef;
