use pagetree::container::{BlockFileConfig, BlockFileContainer};
use pagetree::errors::{ErrorKind, PageTreeError, PageTreeResult};
use pagetree_spatial::Rectangle;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::backtrace::Backtrace;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

/// Block size of the files created by [`TestContext::create_container`].
pub const TEST_BLOCK_SIZE: usize = 1024;

/// Decoded pages kept by containers opened in tests.
pub const TEST_CACHE_PAGES: usize = 16;

/// Runs `test` between `before` and `after`, reporting errors and panics
/// with the elapsed time and a backtrace. `after` runs even if `test` fails.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> PageTreeResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> PageTreeResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> PageTreeResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    let start_time = Instant::now();

    let result = std::panic::catch_unwind(|| {
        let backtrace = Backtrace::capture();
        match before() {
            Ok(ctx) => match test(ctx.clone()) {
                Ok(_) => after(ctx)
                    .map_err(|e| (format!("After run failed: {:?}", e), backtrace.to_string())),
                Err(e) => {
                    let _ = after(ctx);
                    Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                }
            },
            Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
        }
    });

    let elapsed = start_time.elapsed();
    let (error, backtrace) = match result {
        Ok(Ok(_)) => return,
        Ok(Err((e, bt))) => (e, bt),
        Err(panic_err) => {
            let msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else {
                format!("Unknown panic: {:?}", panic_err.type_id())
            };
            (format!("Panic: {}", msg), Backtrace::capture().to_string())
        }
    };

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {:?}", elapsed);
    eprintln!("Error: {}", error);
    if !backtrace.is_empty() && !backtrace.contains("disabled") {
        eprintln!("\nBacktrace:\n{}", backtrace);
    }
    eprintln!("=====================================================\n");

    panic!("Test failed: {}", error);
}

/// A scratch directory shared by the trees of one test.
#[derive(Clone)]
pub struct TestContext {
    dir: Arc<TempDir>,
}

impl TestContext {
    pub fn new(dir: TempDir) -> Self {
        Self { dir: Arc::new(dir) }
    }

    /// Path of the file `name` inside the scratch directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Creates the block file `name` with [`TEST_BLOCK_SIZE`] blocks.
    pub fn create_container<N>(&self, name: &str) -> PageTreeResult<BlockFileContainer<N>>
    where
        N: Clone + Serialize + DeserializeOwned + Send,
    {
        let config = BlockFileConfig::default()
            .with_block_size(TEST_BLOCK_SIZE)
            .with_cache_pages(TEST_CACHE_PAGES);
        BlockFileContainer::create(self.path(name), config)
    }

    /// Opens the block file `name` created earlier in this context.
    pub fn open_container<N>(&self, name: &str) -> PageTreeResult<BlockFileContainer<N>>
    where
        N: Clone + Serialize + DeserializeOwned + Send,
    {
        BlockFileContainer::open(self.path(name), TEST_CACHE_PAGES)
    }
}

pub fn create_test_context() -> PageTreeResult<TestContext> {
    let dir = tempfile::Builder::new().prefix("pagetree_").tempdir()?;
    log::debug!("Test context at {:?}", dir.path());
    Ok(TestContext::new(dir))
}

/// Removes the scratch directory once the last handle on it is gone.
pub fn cleanup(ctx: TestContext) -> PageTreeResult<()> {
    match Arc::try_unwrap(ctx.dir) {
        Ok(dir) => {
            let path = dir.path().to_path_buf();
            dir.close().map_err(|e| {
                PageTreeError::new(
                    &format!("Failed to remove test directory {:?}: {}", path, e),
                    ErrorKind::IOError,
                )
            })
        }
        Err(_) => Ok(()),
    }
}

/// The keys of `range` in an order fixed by `seed`.
pub fn shuffled_keys(range: std::ops::RangeInclusive<u32>, seed: u64) -> Vec<u32> {
    let mut keys: Vec<u32> = range.collect();
    keys.shuffle(&mut StdRng::seed_from_u64(seed));
    keys
}

/// `count` random rectangles inside `[0, 1000]²`, numbered from zero.
pub fn random_rects(seed: u64, count: u64) -> Vec<(Rectangle, u64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| {
            let x = rng.gen_range(0.0..990.0);
            let y = rng.gen_range(0.0..990.0);
            let w = rng.gen_range(0.0..10.0);
            let h = rng.gen_range(0.0..10.0);
            (Rectangle::new_2d(x, y, x + w, y + h), id)
        })
        .collect()
}

/// `count` random points inside `[0, 1000]²`.
pub fn random_points(seed: u64, count: usize) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| vec![rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0)])
        .collect()
}
