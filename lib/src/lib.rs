// Copyright 2023 The Strata Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Library for strata, a versioned, content-addressed store for ordered
//! columnar time-series.
//!
//! A [`repo::Repo`] holds named [`collection::Collection`]s; each collection
//! is a set of labeled [`series::Series`] sharing a schema. Writes produce
//! immutable content-addressed segments plus a revision in a hash-chained
//! [`changelog::Changelog`]; reads merge the overlapping revisions under
//! last-writer-wins into non-overlapping [`segment::Segment`] slices.

pub mod changelog;
pub mod codec;
pub mod collection;
pub mod expr;
pub mod file_pod;
pub mod frame;
pub mod hex_util;
pub mod memory_pod;
pub mod object_id;
pub mod pod;
pub mod query;
pub mod repo;
pub mod schema;
pub mod segment;
pub mod series;
pub mod value;
