use pagetree::container::BlockFileContainer;
use pagetree::mvbt::{Lifespan, Mvbt, MvNode, MvbtConfig};
use pagetree::tree::Capacity;
use pagetree_int_test::test_util::{cleanup, create_test_context, run_test, shuffled_keys};

type FileMvbt = Mvbt<u32, u32, BlockFileContainer<MvNode<u32, u32>>>;

const VERSIONS: u32 = 40;
const LIFETIME: u32 = 5;

fn config() -> MvbtConfig<u32> {
    MvbtConfig::new(Capacity::new(4, 16).unwrap(), 0)
}

/// Key `k` is inserted at version `k` and removed `LIFETIME` versions later,
/// unless that is past the last version.
fn alive(key: u32, version: u32) -> bool {
    key <= version && (key + LIFETIME >= VERSIONS || version < key + LIFETIME)
}

#[test]
fn test_sliding_window_of_versions() {
    run_test(
        || create_test_context(),
        |ctx| {
            let tree = FileMvbt::new(ctx.create_container("window.db")?, config())?;
            for version in 0..VERSIONS {
                tree.advance_to(u64::from(version))?;
                tree.insert(version, version * 3)?;
                if version >= LIFETIME {
                    assert_eq!(tree.remove(&(version - LIFETIME))?, Some((version - LIFETIME) * 3));
                }
            }
            tree.check()?;
            assert!(tree.root_history().len() > 1);

            for version in 0..VERSIONS {
                let expected: Vec<(u32, u32)> = (0..VERSIONS)
                    .filter(|&key| alive(key, version))
                    .map(|key| (key, key * 3))
                    .collect();
                assert_eq!(tree.range(.., u64::from(version))?, expected, "version {}", version);
            }
            assert_eq!(
                tree.history(&3)?,
                vec![(Lifespan { begin: 3, end: Some(8) }, 9)]
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_updates_keep_old_values_after_reopen() {
    run_test(
        || create_test_context(),
        |ctx| {
            {
                let tree = FileMvbt::new(ctx.create_container("updates.db")?, config())?;
                for key in shuffled_keys(0..=299, 5) {
                    tree.insert(key, 0)?;
                }
                for round in 1..=3u32 {
                    tree.advance_to(u64::from(round))?;
                    for key in shuffled_keys(0..=299, u64::from(round)) {
                        if key % round == 0 {
                            assert!(tree.update(key, round)?.is_some());
                        }
                    }
                }
                assert_eq!(tree.update(1000, 1)?, None);
                tree.flush()?;
            }

            let tree = FileMvbt::open(ctx.open_container("updates.db")?, config())?;
            tree.check()?;
            assert_eq!(tree.now(), 3);
            for key in 0..300u32 {
                let mut expected = 0;
                for version in 0..=3u32 {
                    if version > 0 && key % version == 0 {
                        expected = version;
                    }
                    assert_eq!(tree.get(&key, u64::from(version))?, Some(expected));
                }
                let updates = (1..=3u32).filter(|round| key % round == 0).count();
                assert_eq!(tree.history(&key)?.len(), updates + 1);
            }
            assert_eq!(tree.len_at(3)?, 300);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
