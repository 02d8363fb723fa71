use crio::index::BPlusTree;

fn main() {
    println!("Crio - An embedded storage engine in Rust");
    println!("==========================================\n");

    let db_path = "demo.db";

    let tree = BPlusTree::<i32, i32>::open(db_path).expect("failed to open tree");
    println!("Opened B+ tree backed by: {}", db_path);

    for i in 0..20 {
        tree.put(i, i * i).expect("put failed");
    }
    println!("Inserted 20 key/value pairs\n");

    println!("get(7) = {:?}", tree.get(&7).unwrap());
    println!("get(100) = {:?}", tree.get(&100).unwrap());

    println!("\nrange [5, 10]:");
    for value in tree.get_range(&5, &10).unwrap() {
        println!("  {}", value);
    }

    println!("\nfull iteration:");
    for entry in tree.iterator().unwrap() {
        let (key, value) = entry.expect("iteration failed");
        println!("  {} -> {}", key, value);
    }

    tree.delete(&7).expect("delete failed");
    println!("\nafter delete(7): get(7) = {:?}", tree.get(&7).unwrap());

    tree.flush().expect("flush failed");
    println!("\nFlushed to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
