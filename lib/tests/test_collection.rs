// Copyright 2024 The Strata Authors
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

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use strata_lib::frame::Frame;
use strata_lib::repo::Repo;
use strata_lib::repo::RepoError;
use strata_lib::schema::Schema;
use strata_lib::value::Array;

fn schema() -> Schema {
    Schema::parse("timestamp timestamp* | value f8").unwrap()
}

fn frame(values: &[f64]) -> Frame {
    Frame::new(
        schema(),
        &[
            ("timestamp", Array::from(vec![1i64, 2, 3])),
            ("value", Array::from(values.to_vec())),
        ],
    )
    .unwrap()
}

#[test]
fn test_create_and_read_back() {
    let repo = Repo::in_memory();
    let temperature = repo.create_collection(&schema(), "temperature").unwrap();
    let brussels = temperature.series("Brussels").unwrap();
    brussels.write(&frame(&[11.0, 12.0, 13.0])).unwrap();

    // Reopen through the repository.
    let temperature = repo.collection("temperature").unwrap();
    let brussels = temperature.get("Brussels").unwrap();
    assert_eq!(brussels.frame().unwrap(), frame(&[11.0, 12.0, 13.0]));

    assert_eq!(repo.ls().unwrap(), ["temperature"]);
    assert_eq!(temperature.ls().unwrap(), ["Brussels"]);
}

#[test]
fn test_double_creation() {
    let repo = Repo::in_memory();
    repo.create_collection(&schema(), "temperature").unwrap();
    // Recreating an existing collection is a no-op at the repo level.
    repo.create_collection(&schema(), "temperature").unwrap();
    assert_eq!(repo.ls().unwrap(), ["temperature"]);
    assert_eq!(repo.revisions().unwrap().len(), 1);

    repo.create_collections(&schema(), &["temperature", "wind"]).unwrap();
    assert_eq!(repo.ls().unwrap(), ["temperature", "wind"]);
}

#[test]
fn test_explicit_create_conflict() {
    let repo = Repo::in_memory();
    let temperature = repo.create_collection(&schema(), "temperature").unwrap();
    temperature.create(&["Brussels"]).unwrap();
    // Unlike the get-or-create path, an explicit create of an existing
    // label fails the whole batch.
    assert_matches!(
        temperature.create(&["Paris", "Brussels"]),
        Err(RepoError::LabelExists(label)) if label == "Brussels"
    );
    assert_eq!(temperature.ls().unwrap(), ["Brussels"]);
}

#[test]
fn test_unknown_labels() {
    let repo = Repo::in_memory();
    assert_matches!(repo.collection("nope"), Err(RepoError::UnknownLabel(_)));
    let temperature = repo.create_collection(&schema(), "temperature").unwrap();
    assert_matches!(temperature.get("nope"), Err(RepoError::UnknownLabel(_)));
}

#[test]
fn test_multi_series() {
    let repo = Repo::in_memory();
    let temperature = repo.create_collection(&schema(), "temperature").unwrap();
    let brussels = temperature.series("Brussels").unwrap();
    brussels.write(&frame(&[11.0, 12.0, 13.0])).unwrap();
    let paris = temperature.series("Paris").unwrap();
    paris.write(&frame(&[21.0, 22.0, 23.0])).unwrap();

    assert_eq!(brussels.frame().unwrap(), frame(&[11.0, 12.0, 13.0]));
    assert_eq!(paris.frame().unwrap(), frame(&[21.0, 22.0, 23.0]));

    assert_eq!(repo.revisions().unwrap().len(), 1);
    assert_eq!(temperature.revisions().unwrap().len(), 2);
    assert_eq!(brussels.revisions().unwrap().len(), 1);

    assert_eq!(temperature.ls().unwrap(), ["Brussels", "Paris"]);
}

#[test]
fn test_pack() {
    let repo = Repo::in_memory();
    let temperature = repo.create_collection(&schema(), "temperature").unwrap();
    assert!(temperature.pack().unwrap().is_none());

    temperature.series("Brussels").unwrap();
    assert!(temperature.pack().unwrap().is_none());

    temperature.series("Paris").unwrap();
    // Two label revisions now: pack rewrites them as one.
    assert!(temperature.pack().unwrap().is_some());
    assert_eq!(temperature.revisions().unwrap().len(), 1);
    assert_eq!(temperature.ls().unwrap(), ["Brussels", "Paris"]);
}

#[test]
fn test_squash() {
    for archive in [false, true] {
        let repo = Repo::in_memory();
        let temperature = repo.create_collection(&schema(), "temperature").unwrap();
        assert!(temperature.squash(archive).unwrap().is_none());

        let brussels = temperature.series("Brussels").unwrap();
        brussels.write(&frame(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(temperature.revisions().unwrap().len(), 1);

        temperature.squash(archive).unwrap();
        assert_eq!(temperature.revisions().unwrap().len(), 1);

        brussels.write(&frame(&[11.0, 12.0, 13.0])).unwrap();
        let paris = temperature.series("Paris").unwrap();
        paris.write(&frame(&[11.0, 12.0, 13.0])).unwrap();

        temperature.squash(archive).unwrap();
        assert_eq!(temperature.revisions().unwrap().len(), 1);

        // Data reads back unchanged, one revision per series.
        assert_eq!(temperature.ls().unwrap(), ["Brussels", "Paris"]);
        for label in ["Brussels", "Paris"] {
            let series = temperature.get(label).unwrap();
            assert_eq!(series.revisions().unwrap().len(), 1);
            assert_eq!(series.frame().unwrap(), frame(&[11.0, 12.0, 13.0]));
        }
    }
}

#[test]
fn test_series_schema_from_registry() {
    let repo = Repo::in_memory();
    let other = Schema::parse("key i64* | name str").unwrap();
    let collection = repo.create_collection(&schema(), "mixed").unwrap();
    collection.create_with_schema(&other, &["lookup"]).unwrap();

    // The registry remembers each label's schema.
    let series = collection.get("lookup").unwrap();
    assert_eq!(series.schema(), &other);
}
