use std::sync::Arc;

use cairn::buffer::BufferPoolManager;
use cairn::common::{DEFAULT_BUFFER_POOL_SIZE, DEFAULT_LRUK_K};
use cairn::index::{BPlusTree, IntegerComparator};
use cairn::storage::disk::DiskManager;
use cairn::{PageId, RecordId, SlotId};

fn main() {
    println!("Cairn - a disk-oriented storage engine core");
    println!("===========================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Opened database file: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(
        DEFAULT_BUFFER_POOL_SIZE,
        DEFAULT_LRUK_K,
        disk_manager,
    ));
    println!("Created buffer pool with {} frames\n", bpm.pool_size());

    let tree = BPlusTree::new(
        "demo_index",
        Arc::clone(&bpm),
        Arc::new(IntegerComparator),
        8,
        8,
    )
    .expect("Failed to open index");

    for key in [15, 3, 42, 27, 8, 99, 54, 61, 33, 70] {
        let record = RecordId::new(PageId::new(100 + key), SlotId::new(0));
        tree.insert(key, record).expect("Failed to insert");
        println!("Inserted key {} -> {:?}", key, record);
    }

    println!("\nRoot page: {}", tree.root_page_id());

    match tree.get_value(42).expect("Lookup failed") {
        Some(record) => println!("Point lookup 42 -> {:?}", record),
        None => println!("Key 42 missing"),
    }

    println!("\nRange scan from 27:");
    let mut iter = tree.begin_at(27).expect("Failed to build iterator");
    while let Some((key, record)) = iter.next().expect("Scan failed") {
        println!("  {} -> {:?}", key, record);
    }
    drop(iter);

    tree.remove(27).expect("Failed to remove");
    println!("\nRemoved key 27");
    assert!(tree.get_value(27).expect("Lookup failed").is_none());

    bpm.flush_all_pages().expect("Failed to flush");
    println!("Flushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
