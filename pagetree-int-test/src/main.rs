use pagetree::btree::{BPlusOps, BPlusTree};
use pagetree::container::BlockFileContainer;
use pagetree::errors::PageTreeResult;
use pagetree::tree::NodeOf;
use pagetree_int_test::test_util::{cleanup, create_test_context, random_rects, shuffled_keys};
use pagetree_spatial::rtree::RTreeNode;
use pagetree_spatial::{RTree, RTreeConfig, Rectangle};

fn main() -> PageTreeResult<()> {
    colog::init();
    println!("Starting stress test...");
    let ctx = create_test_context()?;
    let count = 200_000u32;

    let sample = (0u32, 0u32);
    let capacity = BPlusTree::<u32, u32, BlockFileContainer<NodeOf<BPlusOps<u32, u32>>>>::capacity_for(
        4096, &sample, 0.4,
    )?;
    let btree: BPlusTree<u32, u32, BlockFileContainer<_>> =
        BPlusTree::new(ctx.create_container("stress.btree")?, capacity);

    let start = std::time::Instant::now();
    for key in shuffled_keys(1..=count, 1) {
        btree.insert(key, key)?;
    }
    btree.flush()?;
    println!("Inserted {} keys into the B+-tree in {:?}", count, start.elapsed());

    let start = std::time::Instant::now();
    let report = btree.check()?;
    println!(
        "Checked {} entries in {} nodes ({} levels) in {:?}",
        report.entries,
        report.nodes(),
        report.height,
        start.elapsed()
    );

    let sample = (Rectangle::new_2d(0.0, 0.0, 1.0, 1.0), 0u64);
    let capacity = RTree::<u64, BlockFileContainer<RTreeNode<u64>>>::capacity_for(4096, &sample, 0.4)?;
    let rtree: RTree<u64, BlockFileContainer<_>> =
        RTree::new(ctx.create_container("stress.rtree")?, RTreeConfig::new(capacity));

    let start = std::time::Instant::now();
    for (rect, id) in random_rects(1, u64::from(count)) {
        rtree.insert(rect, id)?;
    }
    rtree.flush()?;
    println!("Inserted {} rectangles into the R-tree in {:?}", count, start.elapsed());

    let start = std::time::Instant::now();
    let window = Rectangle::new_2d(100.0, 100.0, 400.0, 400.0);
    let mut found = 0;
    for _ in 0..100 {
        found = rtree.query(&window).count();
    }
    println!("100 window queries ({} hits each) in {:?}", found, start.elapsed());

    drop(btree);
    drop(rtree);
    cleanup(ctx)
}
