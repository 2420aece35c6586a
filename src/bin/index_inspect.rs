//! index-inspect - print the layout and contents of a heapdex index file.
//!
//! Usage:
//!   index-inspect <file> --kind <kind> [--from N] [--count M] [--config cfg.json]
//!
//! Kinds: int, long, size, one2many, sorted, inbound, long1n

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

use heapdex::index::{
    InboundReader, IntIndex1NReader, IntIndex1NSortedReader, LongIndex1NReader, PagedReader,
    SizeIndexReader,
};
use heapdex::resource::{describe, SystemResources};
use heapdex::{IndexConfig, IndexReader, One2ManyIndex, One2ManyLongIndex, One2SizeIndex};

const KINDS: &str = "int, long, size, one2many, sorted, inbound, long1n";
const DEFAULT_COUNT: usize = 16;

fn print_usage() {
    println!("Usage: index-inspect <file> --kind <kind> [--from N] [--count M] [--config <json>]");
    println!();
    println!("Arguments:");
    println!("  <file>         Index file to inspect");
    println!("  --kind         One of: {}", KINDS);
    println!("  --from         First key to print (default: 0)");
    println!("  --count        Number of keys to print (default: {})", DEFAULT_COUNT);
    println!("  --config       JSON file with index configuration overrides");
    println!();
    println!("Flags:");
    println!("  -V, --version  Print version information");
    println!("  -h, --help     Print this help message");
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn parse_usize(args: &[String], name: &str, default: usize) -> anyhow::Result<usize> {
    match flag_value(args, name) {
        Some(v) => v
            .parse()
            .with_context(|| format!("{} expects a non-negative integer, got '{}'", name, v)),
        None => Ok(default),
    }
}

fn print_paged<T: heapdex::codec::PageElement + std::fmt::Debug>(
    reader: &PagedReader<T>,
    from: usize,
    count: usize,
) -> anyhow::Result<()> {
    let trailer = reader.trailer();
    println!("size:       {}", reader.size());
    println!("page size:  {}", reader.page_size());
    println!("pages:      {}", trailer.page_count());
    for page in 0..trailer.page_count() {
        let (start, end) = trailer.page_range(page);
        println!("  page {:>6}  bytes {}..{}  ({} B)", page, start, end, end - start);
    }
    let end = (from + count).min(reader.size());
    for i in from..end {
        println!("{:>10}  {:?}", i, reader.get(i)?);
    }
    Ok(())
}

fn print_lists<R, V>(reader: &R, from: usize, count: usize, get: impl Fn(&R, usize) -> heapdex::Result<Vec<V>>) -> anyhow::Result<()>
where
    R: IndexReader,
    V: std::fmt::Debug,
{
    println!("keys:       {}", reader.size());
    let end = (from + count).min(reader.size());
    for i in from..end {
        let values = get(reader, i)?;
        if !values.is_empty() {
            println!("{:>10}  {:?}", i, values);
        }
    }
    Ok(())
}

fn inspect(path: &Path, kind: &str, from: usize, count: usize, config: &IndexConfig) -> anyhow::Result<()> {
    match kind {
        "int" => print_paged(&PagedReader::<i32>::open(path, config)?, from, count),
        "long" => print_paged(&PagedReader::<i64>::open(path, config)?, from, count),
        "size" => {
            let reader = SizeIndexReader::open(path, config)?;
            print_paged(reader.inner(), 0, 0)?;
            let end = (from + count).min(reader.size());
            for i in from..end {
                println!("{:>10}  {}", i, reader.get_size(i)?);
            }
            Ok(())
        }
        "one2many" => {
            let reader = IntIndex1NReader::open(path, config)?;
            println!("body values: {}", reader.body().size());
            print_lists(&reader, from, count, |r, i| r.get(i))
        }
        "sorted" => {
            let reader = IntIndex1NSortedReader::open(path, config)?;
            println!("body values: {}", reader.body().size());
            print_lists(&reader, from, count, |r, i| r.get(i))
        }
        "inbound" => {
            let reader = InboundReader::open(path, config)?;
            println!("body values: {}", reader.as_sorted().body().size());
            print_lists(&reader, from, count, |r, i| r.get(i))
        }
        "long1n" => {
            let reader = LongIndex1NReader::open(path, config)?;
            print_lists(&reader, from, count, |r, i| r.get(i))
        }
        other => bail!("unknown kind '{}', expected one of: {}", other, KINDS),
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("index-inspect {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    if args.len() < 2 || args[1].starts_with("--") {
        print_usage();
        std::process::exit(1);
    }

    let filter = EnvFilter::try_from_env("HEAPDEX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = PathBuf::from(&args[1]);
    let Some(kind) = flag_value(&args, "--kind") else {
        bail!("--kind is required ({})", KINDS);
    };
    let from = parse_usize(&args, "--from", 0)?;
    let count = parse_usize(&args, "--count", DEFAULT_COUNT)?;
    let config = match flag_value(&args, "--config") {
        Some(cfg) => IndexConfig::from_json_file(Path::new(cfg))
            .with_context(|| format!("loading config {}", cfg))?,
        None => IndexConfig::auto_tune(),
    };
    tracing::debug!("{}", describe(&SystemResources::detect()));
    tracing::info!(path = %path.display(), kind, cache_pages = config.cache_pages, "inspecting index");

    inspect(&path, kind, from, count, &config)
        .with_context(|| format!("inspecting {} as {}", path.display(), kind))
}
