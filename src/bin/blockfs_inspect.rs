//! Structural dump of a `blockfs` namespace, grounded in
//! `src/bin/db_inspector.rs`'s shape (`clap`-derived `Opt`,
//! `env_logger::init()`, a recursive print to stdout) but walking a
//! path/metadata tree instead of a columnar partition layout.

use std::sync::Arc;

use blockfs::datastore::backend::dynamodb::DynamoDbBackend;
use blockfs::datastore::backend::memory::MemoryBackend;
use blockfs::datastore::backend::Backend;
use blockfs::fs::BlockFs;
use blockfs::options::Config;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "blockfs-inspect", about = "Inspect a blockfs namespace")]
struct Opt {
    /// DynamoDB table backing the namespace. Omit to inspect a fresh,
    /// empty in-memory namespace (useful only to sanity-check the CLI
    /// itself).
    #[arg(long)]
    table: Option<String>,

    /// Path to start the walk from.
    #[arg(long, default_value = "/")]
    path: String,

    /// Maximum recursion depth (0 = just print the starting node's
    /// own attributes).
    #[arg(long, default_value_t = 8)]
    depth: u32,
}

fn main() {
    env_logger::init();
    let opt = Opt::parse();

    let backend: Arc<dyn Backend> = match &opt.table {
        Some(table) => Arc::new(DynamoDbBackend::new(table.clone())),
        None => Arc::new(MemoryBackend::new()),
    };
    let fs = BlockFs::new(backend, Config::default());

    let root = match fs.open(&opt.path) {
        Ok(node) => node,
        Err(e) => {
            eprintln!("failed to resolve {}: {e}", opt.path);
            std::process::exit(1);
        }
    };

    if let Err(e) = walk(&root, 0, opt.depth) {
        eprintln!("inspection failed: {e}");
        std::process::exit(1);
    }
}

fn walk(node: &Arc<blockfs::file_node::FileNode>, indent: u32, remaining_depth: u32) -> blockfs::error::Result<()> {
    let prefix = "  ".repeat(indent as usize);
    match node.kind()? {
        None => {
            println!("{prefix}{} (imaginary)", node.path());
        }
        Some(blockfs::metadata::NodeKind::File) => {
            let attrs = node.blockfs_attributes()?;
            println!(
                "{prefix}{} [file, {} bytes across {} block(s) of {} bytes, mtime {}]",
                node.path(),
                attrs.content_size,
                attrs.block_count,
                attrs.block_size,
                node.basic_attributes()?.last_modified_millis,
            );
        }
        Some(blockfs::metadata::NodeKind::Folder) => {
            println!("{prefix}{}/", node.path());
            if remaining_depth > 0 {
                for child in node.list_children()? {
                    walk(&child, indent + 1, remaining_depth - 1)?;
                }
            }
        }
    }
    Ok(())
}
