//! Integration Tests for the Atom Store
//!
//! These tests verify that evaluation, invalidation, mounting and batching
//! work together correctly through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use atomstore_core::{action, atom, derived, writable, AtomError, Store, StoreConfig, Teardown};

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    (calls, move || {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    })
}

/// Test that an unchanged derived atom is not recomputed.
#[test]
fn derived_atoms_are_memoized() {
    let store = Store::new();
    let base = atom(10);
    let computes = Arc::new(AtomicUsize::new(0));

    let computes_clone = computes.clone();
    let doubled = derived({
        let base = base.clone();
        move |get| {
            computes_clone.fetch_add(1, Ordering::SeqCst);
            Ok(get.get(&base)? * 2)
        }
    });

    // First access computes
    assert_eq!(store.get(&doubled).unwrap(), 20);
    assert_eq!(store.get(&doubled).unwrap(), 20);
    assert_eq!(computes.load(Ordering::SeqCst), 1);

    // Writing the dependency makes the next read recompute
    store.set(&base, 5).unwrap();
    assert_eq!(store.get(&doubled).unwrap(), 10);
    assert_eq!(computes.load(Ordering::SeqCst), 2);
}

/// Test that two stores never share values.
#[test]
fn stores_are_isolated() {
    let count = atom(0);
    let first = Store::new();
    let second = Store::new();

    first.set(&count, 1).unwrap();
    assert_eq!(first.get(&count).unwrap(), 1);
    assert_eq!(second.get(&count).unwrap(), 0);
}

/// Test that a diamond recomputes its sink once per write and the listener
/// never observes a mix of old and new inputs.
#[test]
fn diamond_updates_are_glitch_free() {
    let store = Store::new();
    let base = atom(1);
    let left = derived({
        let base = base.clone();
        move |get| Ok(get.get(&base)? + 1)
    });
    let right = derived({
        let base = base.clone();
        move |get| Ok(get.get(&base)? * 2)
    });
    let sink_runs = Arc::new(AtomicUsize::new(0));
    let sink = derived({
        let (left, right, sink_runs) = (left.clone(), right.clone(), sink_runs.clone());
        move |get| {
            sink_runs.fetch_add(1, Ordering::SeqCst);
            let (l, r) = (get.get(&left)?, get.get(&right)?);
            // left - 1 == right / 2 for any consistent base
            if l - 1 != r / 2 {
                return Err(AtomError::msg("glitch"));
            }
            Ok(l + r)
        }
    });

    let (notified, listener) = counter();
    let _sub = store.subscribe(&sink, listener).unwrap();
    assert_eq!(sink_runs.load(Ordering::SeqCst), 1);

    store.set(&base, 5).unwrap();
    assert_eq!(store.get(&sink).unwrap(), 16);
    assert_eq!(sink_runs.load(Ordering::SeqCst), 2);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

/// Test that a batch notifies listeners once, after it returns.
#[test]
fn batched_writes_notify_once() {
    let store = Store::new();
    let first = atom(String::from("Ada"));
    let last = atom(String::from("Lovelace"));
    let full = derived({
        let (first, last) = (first.clone(), last.clone());
        move |get| Ok(format!("{} {}", get.get(&first)?, get.get(&last)?))
    });

    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = store
        .subscribe(&full, {
            let (store, full, seen) = (store.clone(), full.clone(), seen.clone());
            move || seen.lock().push(store.get(&full).unwrap_or_default())
        })
        .unwrap();

    store
        .batch(|store| {
            store.set(&first, "Grace".into())?;
            store.set(&last, "Hopper".into())
        })
        .unwrap();

    assert_eq!(*seen.lock(), vec!["Grace Hopper".to_string()]);
}

/// Test that an error in a batch still flushes writes made before it.
#[test]
fn failed_batches_keep_earlier_writes() {
    let store = Store::new();
    let count = atom(0);
    let (notified, listener) = counter();
    let _sub = store.subscribe(&count, listener).unwrap();

    let result: Result<(), AtomError> = store.batch(|store| {
        store.set(&count, 1)?;
        Err(AtomError::msg("abort"))
    });

    assert!(result.is_err());
    assert_eq!(store.get(&count).unwrap(), 1);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

/// Test that mount hooks and teardowns run symmetrically with subscriptions.
#[test]
fn mount_lifecycle_is_symmetric() {
    let store = Store::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let source = atom(0).with_on_mount({
        let log = log.clone();
        move |_set| {
            log.lock().push("mount");
            let log = log.clone();
            Ok(Some(Box::new(move || {
                log.lock().push("unmount");
                Ok(())
            }) as Teardown))
        }
    });
    let view = derived({
        let source = source.clone();
        move |get| Ok(get.get(&source)? + 1)
    });

    let a = store.subscribe(&view, || {}).unwrap();
    let b = store.subscribe(&source, || {}).unwrap();
    drop(a);
    assert_eq!(*log.lock(), vec!["mount"]);
    assert!(store.is_mounted(&source));
    assert!(!store.is_mounted(&view));

    drop(b);
    assert_eq!(*log.lock(), vec!["mount", "unmount"]);
    assert!(!store.is_mounted(&source));
}

/// Test that a mount hook can keep writing to its atom after mounting.
#[test]
fn mount_hooks_write_later_through_set_self() {
    let store = Store::new();
    let slot = Arc::new(Mutex::new(None));
    let feed = atom(0).with_on_mount({
        let slot = slot.clone();
        move |set| {
            *slot.lock() = Some(set);
            Ok(None)
        }
    });

    let (notified, listener) = counter();
    let _sub = store.subscribe(&feed, listener).unwrap();
    let set = slot.lock().clone().unwrap();

    set.set(3).unwrap();
    assert_eq!(store.get(&feed).unwrap(), 3);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

/// Test that read errors reach every dependent and clear on recovery.
#[test]
fn read_errors_propagate_and_recover() {
    let store = Store::new();
    let input = atom(String::from("12"));
    let parsed = derived({
        let input = input.clone();
        move |get| get.get(&input)?.parse::<i64>().map_err(AtomError::evaluation)
    });
    let doubled = derived({
        let parsed = parsed.clone();
        move |get| Ok(get.get(&parsed)? * 2)
    });
    let _sub = store.subscribe(&doubled, || {}).unwrap();

    store.set(&input, "twelve".into()).unwrap();
    assert!(matches!(store.get(&doubled), Err(AtomError::Evaluation(_))));

    store.set(&input, "21".into()).unwrap();
    assert_eq!(store.get(&doubled).unwrap(), 42);
}

/// Test that an atom reading itself is reported instead of overflowing.
#[test]
fn self_reads_are_cycles() {
    let store = Store::new();
    let slot: Arc<Mutex<Option<atomstore_core::Atom<i32>>>> = Arc::new(Mutex::new(None));
    let looping = derived({
        let slot = slot.clone();
        move |get| {
            let me = slot.lock().clone();
            match me {
                Some(me) => get.get(&me),
                None => Ok(0),
            }
        }
    });
    *slot.lock() = Some(looping.clone());

    assert!(matches!(
        store.get(&looping),
        Err(AtomError::CyclicDependency { .. })
    ));
}

/// Test that a write through a derived atom reaches the primitives behind it.
#[test]
fn writable_derived_atoms_forward_writes() {
    let store = Store::new();
    let celsius = atom(0.0_f64);
    let fahrenheit = writable(
        {
            let celsius = celsius.clone();
            move |get| Ok(get.get(&celsius)? * 9.0 / 5.0 + 32.0)
        },
        {
            let celsius = celsius.clone();
            move |set, f: f64| set.set(&celsius, (f - 32.0) * 5.0 / 9.0)
        },
    );

    store.set(&fahrenheit, 212.0).unwrap();
    assert_eq!(store.get(&celsius).unwrap(), 100.0);
    assert_eq!(store.get(&fahrenheit).unwrap(), 212.0);
}

/// Test that an action returns its write result.
#[test]
fn actions_return_values() {
    let store = Store::new();
    let total = atom(0);
    let add = action({
        let total = total.clone();
        move |set, n: i32| {
            let next = set.get(&total)? + n;
            set.set(&total, next)?;
            Ok(next)
        }
    });

    assert_eq!(store.set(&add, 2).unwrap(), 2);
    assert_eq!(store.set(&add, 3).unwrap(), 5);
}

/// Test that the configured write depth bounds mutual recursion.
#[test]
fn write_depth_is_configurable() {
    let store = Store::with_config(StoreConfig::default().with_max_write_depth(3)).unwrap();
    let count = atom(0);
    let nested = action({
        let count = count.clone();
        move |set, depth: usize| {
            set.set(&count, depth as i32)?;
            Ok(depth)
        }
    });
    let outer = action({
        let nested = nested.clone();
        move |set, ()| set.set(&nested, 2)
    });

    assert_eq!(store.set(&outer, ()).unwrap(), 2);
    assert!(Store::with_config(StoreConfig::default().with_max_write_depth(0)).is_err());
}

/// Test that records of dropped atoms are reclaimed.
#[test]
fn dropped_atoms_are_collected() {
    let store = Store::new();
    let kept = atom(1);
    store.get(&kept).unwrap();
    {
        let temporary = atom(2);
        let view = derived({
            let temporary = temporary.clone();
            move |get| get.get(&temporary)
        });
        store.get(&view).unwrap();
    }
    assert_eq!(store.record_count(), 3);

    assert_eq!(store.collect_garbage(), 2);
    assert_eq!(store.record_count(), 1);
    assert_eq!(store.get(&kept).unwrap(), 1);
}

/// Test that a scoped store shares unscoped atoms and isolates scoped ones.
#[test]
fn scoped_stores_split_state() {
    let root = Store::new();
    let theme = atom("light");
    let draft = atom(String::new());
    let summary = derived({
        let (theme, draft) = (theme.clone(), draft.clone());
        move |get| Ok(format!("{}:{}", get.get(&theme)?, get.get(&draft)?))
    });
    let editor = root.derive([&draft]);

    editor.set(&draft, "hello".into()).unwrap();
    root.set(&theme, "dark").unwrap();

    assert_eq!(editor.get(&summary).unwrap(), "dark:hello");
    assert_eq!(root.get(&summary).unwrap(), "dark:");
}

/// Test devtools snapshots and restore.
#[cfg(feature = "devtools")]
#[test]
fn devtools_inspect_and_restore() {
    use atomstore_core::store::Restore;

    let store = Store::new();
    let count = atom(1).with_label("count");
    let doubled = derived({
        let count = count.clone();
        move |get| Ok(get.get(&count)? * 2)
    });
    let _sub = store.subscribe(&doubled, || {}).unwrap();

    let mounted = store.dev_mounted_atoms();
    assert_eq!(mounted.len(), 2);
    let snapshot = store.dev_atom_state(&doubled).unwrap();
    let dependencies: Vec<_> = snapshot.dependencies.iter().map(|(id, _)| *id).collect();
    assert_eq!(dependencies, vec![count.id()]);

    store.dev_restore([Restore::new(&count, 21)]).unwrap();
    assert_eq!(store.get(&doubled).unwrap(), 42);

    let json = serde_json::to_value(store.dev_atom_state(&count).unwrap()).unwrap();
    assert_eq!(json["label"], "count");
}

/// Test the subscribe, write, unsubscribe walkthrough end to end.
#[test]
fn doubled_counter_walkthrough() {
    let store = Store::new();
    let count = atom(1);
    let doubled = derived({
        let count = count.clone();
        move |get| Ok(get.get(&count)? * 2)
    });

    let (notified, listener) = counter();
    let sub = store.subscribe(&doubled, listener).unwrap();
    assert_eq!(store.get(&doubled).unwrap(), 2);

    store.set(&count, 5).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(&doubled).unwrap(), 10);

    sub.unsubscribe().unwrap();
    store.set(&count, 7).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(&doubled).unwrap(), 14);
}
