use pretty_assertions::assert_eq;
use spark_context::{batch, cloned, track, untrack, with_runtime, Context, Key, Value};
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

fn text(ctx: &Context, key: &str) -> Option<String> {
    ctx.get_as::<&str>(key).map(|s| s.to_string())
}

#[test]
fn session_reruns_on_every_tracked_write() {
    let ctx = Context::create();
    ctx.set("count", 1u32).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));

    ctx.run_and_track(cloned!(seen => move |c| {
        seen.borrow_mut().push(c.get_as::<u32>("count").map(|n| *n));
        true
    }))
    .unwrap();

    ctx.set("count", 2u32).unwrap();
    ctx.remove("count").unwrap();
    assert_eq!(*seen.borrow(), vec![Some(1), Some(2), None]);
}

#[test]
fn writing_the_same_value_handle_is_not_a_change() {
    let ctx = Context::create();
    let value: Value = Rc::new(5u8);
    ctx.set_value("k", value.clone()).unwrap();
    let runs = Rc::new(Cell::new(0));

    ctx.run_and_track(cloned!(runs => move |c| {
        runs.set(runs.get() + 1);
        c.get("k");
        true
    }))
    .unwrap();

    ctx.set_value("k", value).unwrap();
    assert_eq!(runs.get(), 1);

    // A new handle is a change even with equal contents
    ctx.set("k", 5u8).unwrap();
    assert_eq!(runs.get(), 2);
}

#[test]
fn batch_coalesces_writes_into_one_run() {
    let ctx = Context::create();
    let runs = Rc::new(Cell::new(0));

    ctx.run_and_track(cloned!(runs => move |c| {
        runs.set(runs.get() + 1);
        c.get("a");
        c.get("b");
        true
    }))
    .unwrap();

    batch(|| {
        ctx.set("a", 1).unwrap();
        ctx.set("b", 2).unwrap();
        assert_eq!(runs.get(), 1);
    });
    assert_eq!(runs.get(), 2);
}

#[test]
fn untracked_reads_are_not_dependencies() {
    let ctx = Context::create();
    let runs = Rc::new(Cell::new(0));

    ctx.run_and_track(cloned!(runs => move |c| {
        runs.set(runs.get() + 1);
        c.get("tracked");
        untrack(|| c.get("ignored"));
        true
    }))
    .unwrap();

    ctx.set("ignored", 1).unwrap();
    assert_eq!(runs.get(), 1);
    ctx.set("tracked", 1).unwrap();
    assert_eq!(runs.get(), 2);
}

#[test]
fn grouped_sessions_wait_for_process_waiting() {
    let ctx = Context::create();
    let seen = Rc::new(RefCell::new(Vec::new()));

    ctx.run_and_track_grouped(cloned!(seen => move |c| {
        seen.borrow_mut().push((text(c, "s1"), text(c, "s2")));
        true
    }))
    .unwrap();
    assert_eq!(seen.borrow().len(), 1);

    ctx.set("s1", "x").unwrap();
    ctx.set("s2", "y").unwrap();
    assert_eq!(seen.borrow().len(), 1);

    ctx.process_waiting();
    assert_eq!(
        seen.borrow().last().cloned(),
        Some((Some("x".to_string()), Some("y".to_string())))
    );
    assert_eq!(seen.borrow().len(), 2);

    // Nothing waiting: no run
    ctx.process_waiting();
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn session_writes_trigger_other_sessions() {
    let ctx = Context::create();
    ctx.set("input", 1i32).unwrap();

    ctx.run_and_track(|c| {
        let doubled = c.get_as::<i32>("input").map(|n| *n * 2).unwrap_or_default();
        c.set("doubled", doubled).is_ok()
    })
    .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    ctx.run_and_track(cloned!(seen => move |c| {
        seen.borrow_mut().push(c.get_as::<i32>("doubled").map(|n| *n));
        true
    }))
    .unwrap();

    ctx.set("input", 5i32).unwrap();
    assert_eq!(*seen.borrow(), vec![Some(2), Some(10)]);
}

#[test]
fn a_panicking_session_leaves_its_siblings_running() {
    let ctx = Context::create();
    ctx.set("x", 0i32).unwrap();

    let failing_runs = Rc::new(Cell::new(0));
    ctx.run_and_track(cloned!(failing_runs => move |c| {
        let _ = c.get("x");
        failing_runs.set(failing_runs.get() + 1);
        if failing_runs.get() == 2 {
            panic!("second run fails");
        }
        true
    }))
    .unwrap();

    let sibling_runs = Rc::new(Cell::new(0));
    ctx.run_and_track(cloned!(sibling_runs => move |c| {
        let _ = c.get("x");
        sibling_runs.set(sibling_runs.get() + 1);
        true
    }))
    .unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| ctx.set("x", 1i32)));
    assert!(result.is_err());
    assert_eq!(sibling_runs.get(), 2);

    ctx.set("x", 2i32).unwrap();
    ctx.set("x", 3i32).unwrap();
    assert_eq!(failing_runs.get(), 4);
    assert_eq!(sibling_runs.get(), 4);
}

// =============================================================================
// COMPUTED VALUES
// =============================================================================

#[test]
fn computed_values_can_read_other_computed_values() {
    let ctx = Context::create();
    ctx.set("celsius", 100i32).unwrap();
    ctx.set_computed("fahrenheit", |c: &Context, _: &Key| -> Option<Value> {
        let celsius = c.get_as::<i32>("celsius")?;
        Some(Rc::new(*celsius * 9 / 5 + 32) as Value)
    })
    .unwrap();
    ctx.set_computed("label", |c: &Context, _: &Key| -> Option<Value> {
        let f = c.get_as::<i32>("fahrenheit")?;
        Some(Rc::new(format!("{f}F")) as Value)
    })
    .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    track!(ctx, seen => |c| {
        seen.borrow_mut().push(c.get_as::<String>("label").map(|s| s.to_string()))
    })
    .unwrap();

    ctx.set("celsius", 0i32).unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![Some("212F".to_string()), Some("32F".to_string())]
    );
}

#[test]
fn disposing_a_requester_drops_its_cache() {
    let root = Context::create();
    root.set_computed("now", |_: &Context, _: &Key| -> Option<Value> {
        Some(Rc::new(1u8) as Value)
    })
    .unwrap();

    let before = with_runtime(|rt| rt.reaction_count());
    let child = root.create_child().unwrap();
    assert!(child.get("now").is_some());
    assert_eq!(with_runtime(|rt| rt.reaction_count()), before + 1);

    child.dispose();
    assert_eq!(with_runtime(|rt| rt.reaction_count()), before);
}

#[test]
fn a_panicking_computation_recovers_once_its_input_changes() {
    let ctx = Context::create();
    ctx.set("fail", true).unwrap();
    ctx.set_computed("checked", |c: &Context, _: &Key| -> Option<Value> {
        if c.get_as::<bool>("fail").is_some_and(|f| *f) {
            panic!("input rejected");
        }
        Some(Rc::new("ok") as Value)
    })
    .unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| ctx.get("checked")));
    assert!(result.is_err());

    ctx.set("fail", false).unwrap();
    assert_eq!(text(&ctx, "checked").as_deref(), Some("ok"));
}

// =============================================================================
// CROSS-THREAD UPDATES
// =============================================================================

#[test]
fn posted_updates_apply_in_order_on_process_waiting() {
    let ctx = Context::create();
    let seen = Rc::new(RefCell::new(Vec::new()));
    ctx.run_and_track(cloned!(seen => move |c| {
        seen.borrow_mut().push(c.get_as::<u64>("tick").map(|n| *n));
        true
    }))
    .unwrap();

    let updater = ctx.updater();
    std::thread::spawn(move || {
        for tick in 1..=3u64 {
            updater.set("tick", tick);
        }
    })
    .join()
    .unwrap();

    assert_eq!(*seen.borrow(), vec![None]);
    ctx.process_waiting();
    // Applied in one batch: a single re-run sees the last value
    assert_eq!(*seen.borrow(), vec![None, Some(3)]);
}
