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

//! Minimal command-line surface over the strata library: everything here
//! delegates to `Repo`/`Collection`/`Series`.

use std::io::BufRead as _;
use std::io::Write as _;

use anyhow::Context as _;
use anyhow::bail;
use clap::Parser as _;
use strata_lib::frame::Closed;
use strata_lib::frame::Frame;
use strata_lib::repo::Repo;
use strata_lib::schema::Schema;
use strata_lib::value::Array;
use strata_lib::value::Value;
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[command(name = "strata", version, about = "Versioned columnar time-series store")]
struct Cli {
    /// Repository URI, e.g. file:///var/data/ts or memory:// (defaults to
    /// $STRATA_REPO)
    #[arg(long, global = true)]
    repo: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// List collections, or the series of one collection
    Ls {
        collection: Option<String>,
    },
    /// Create a collection with the given schema
    Create {
        collection: String,
        /// Schema text, e.g. "timestamp timestamp* | value f8"
        schema: String,
    },
    /// Write CSV rows (with a header line) from stdin into a series
    Write {
        collection: String,
        series: String,
    },
    /// Print a series as CSV
    Read {
        collection: String,
        series: String,
        /// Start key, comma-separated for a multi-column index
        #[arg(long)]
        start: Option<String>,
        /// Stop key
        #[arg(long)]
        stop: Option<String>,
        /// Interval closure: left, right, both or none
        #[arg(long, default_value = "left")]
        closed: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Columns to keep, comma-separated
        #[arg(long)]
        select: Option<String>,
    },
    /// Collapse the history of every series of a collection
    Squash {
        collection: String,
        /// Keep superseded commits under archive/
        #[arg(long)]
        archive: bool,
    },
    /// Rewrite a collection's label index as a single revision
    Pack {
        collection: String,
    },
    /// Delete segment blobs no revision references; prints the count
    Gc,
}

fn open_repo(cli: &Cli) -> anyhow::Result<Repo> {
    let uri = match &cli.repo {
        Some(uri) => uri.clone(),
        None => std::env::var("STRATA_REPO")
            .context("no repository: pass --repo or set $STRATA_REPO")?,
    };
    Ok(Repo::open(&uri)?)
}

fn parse_csv_column(
    schema: &Schema,
    name: &str,
    texts: &[&str],
) -> anyhow::Result<Array> {
    let column = schema
        .get(name)
        .with_context(|| format!("column {name} is not part of the schema"))?;
    let mut array = Array::empty(column.dtype);
    for text in texts {
        let value = Value::parse(column.dtype, text)
            .with_context(|| format!("cannot parse {text:?} as {}", column.dtype))?;
        array.push(&value);
    }
    Ok(array)
}

fn read_csv_frame(schema: &Schema) -> anyhow::Result<Frame> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    let header = lines
        .next()
        .context("empty input: expected a CSV header line")??;
    let names: Vec<String> = header.split(',').map(|name| name.trim().to_string()).collect();
    let mut cells: Vec<Vec<String>> = vec![vec![]; names.len()];
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Vec<&str> = line.split(',').map(str::trim).collect();
        if row.len() != names.len() {
            bail!("row has {} cells, header has {}", row.len(), names.len());
        }
        for (cell, text) in std::iter::zip(&mut cells, row) {
            cell.push(text.to_string());
        }
    }
    let mut named = vec![];
    for (name, texts) in std::iter::zip(&names, cells) {
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        named.push((name.as_str(), parse_csv_column(schema, name, &texts)?));
    }
    Ok(Frame::new(schema.clone(), &named)?)
}

fn print_frame(frame: &Frame) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let names: Vec<&str> = frame.schema().names().collect();
    writeln!(out, "{}", names.join(","))?;
    for row in frame.rows() {
        let cells: Vec<String> = row.iter().map(Value::to_string).collect();
        writeln!(out, "{}", cells.join(","))?;
    }
    Ok(())
}

fn parse_key(schema: &Schema, text: &str) -> anyhow::Result<Vec<Value>> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    Ok(schema.parse_key(&parts)?)
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Ls { collection } => {
            let repo = open_repo(cli)?;
            let labels = match collection {
                Some(label) => repo.collection(label)?.ls()?,
                None => repo.ls()?,
            };
            for label in labels {
                println!("{label}");
            }
        }
        Command::Create { collection, schema } => {
            let repo = open_repo(cli)?;
            let schema = Schema::parse(schema)?;
            repo.create_collection(&schema, collection)?;
        }
        Command::Write { collection, series } => {
            let repo = open_repo(cli)?;
            let series = repo.collection(collection)?.series(series)?;
            let frame = read_csv_frame(series.schema())?;
            let commit = series.write(&frame)?;
            eprintln!("committed {commit}");
        }
        Command::Read {
            collection,
            series,
            start,
            stop,
            closed,
            limit,
            offset,
            select,
        } => {
            let repo = open_repo(cli)?;
            let series = repo.collection(collection)?.get(series)?;
            let closed = Closed::parse(closed)
                .with_context(|| format!("invalid closed flag {closed:?}"))?;
            let mut query = series.query().closed(closed).offset(*offset);
            if let Some(text) = start {
                query = query.start(parse_key(series.schema(), text)?);
            }
            if let Some(text) = stop {
                query = query.stop(parse_key(series.schema(), text)?);
            }
            if let Some(limit) = limit {
                query = query.limit(*limit);
            }
            if let Some(select) = select {
                query = query.select(select.split(',').map(str::trim));
            }
            print_frame(&query.frame()?)?;
        }
        Command::Squash { collection, archive } => {
            let repo = open_repo(cli)?;
            repo.collection(collection)?.squash(*archive)?;
        }
        Command::Pack { collection } => {
            let repo = open_repo(cli)?;
            match repo.collection(collection)?.pack()? {
                Some(commit) => eprintln!("packed into {commit}"),
                None => eprintln!("nothing to pack"),
            }
        }
        Command::Gc => {
            let repo = open_repo(cli)?;
            println!("{}", repo.gc()?);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(&cli)
}
