use pagetree::container::BlockFileContainer;
use pagetree::errors::ErrorKind;
use pagetree::mvbt::{AutoDeleteMvbt, MvNode, MvbtConfig};
use pagetree::tree::Capacity;
use pagetree_int_test::test_util::{cleanup, create_test_context, run_test};

type FileAutoDelete = AutoDeleteMvbt<u32, String, BlockFileContainer<MvNode<u32, String>>>;

fn config() -> MvbtConfig<u32> {
    MvbtConfig::new(Capacity::new(2, 8).unwrap(), 0)
}

#[test]
fn test_objects_expire_one_version_at_a_time() {
    run_test(
        || create_test_context(),
        |ctx| {
            let tree = FileAutoDelete::new(ctx.create_container("expire.db")?, config())?;
            for key in 0..50u32 {
                tree.insert(key, format!("object-{}", key), 10)?;
            }
            tree.check_heap()?;
            assert!(tree.tracked_leaves() > 0);

            for version in 1..=11 {
                tree.advance_to(version)?;
                tree.check_heap()?;
                tree.check()?;
            }

            assert!(tree.range(.., 10)?.is_empty());
            let at_nine = tree.range(.., 9)?;
            assert_eq!(at_nine.len(), 50);
            assert_eq!(at_nine[7], (7, "object-7".to_string()));
            assert_eq!(tree.get(&7, 9)?, Some("object-7".to_string()));
            assert_eq!(tree.get(&7, 10)?, None);
            assert_eq!(tree.tracked_leaves(), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_expiry_continues_after_reopen() {
    run_test(
        || create_test_context(),
        |ctx| {
            {
                let tree = FileAutoDelete::new(ctx.create_container("reopen.db")?, config())?;
                for version in 0..5u64 {
                    tree.advance_to(version)?;
                    for i in 0..20u32 {
                        let key = version as u32 * 20 + i;
                        tree.insert(key, key.to_string(), version + 3 + u64::from(i % 4))?;
                    }
                }
                tree.check()?;
                tree.flush()?;
            }

            let tree = FileAutoDelete::open(ctx.open_container("reopen.db")?, config())?;
            assert_eq!(tree.now(), 4);
            tree.check_heap()?;
            for version in 5..=12 {
                tree.advance_to(version)?;
                tree.check()?;
            }

            for version in 0..=12u64 {
                let expected = (0..5u64)
                    .flat_map(|v| (0..20u64).map(move |i| (v, v + 3 + i % 4)))
                    .filter(|&(begin, end)| begin <= version && version < end)
                    .count();
                assert_eq!(tree.len_at(version)?, expected, "alive at version {}", version);
            }
            assert_eq!(tree.len_at(12)?, 0);
            assert_eq!(tree.tracked_leaves(), 0);

            let err = tree.insert(1000, "late".to_string(), 12).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
