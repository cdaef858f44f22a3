//! Async spies: published at call time, resolved at await time.

use decoy::{args, Decoy, Spec, Value};
use futures::{executor::block_on, FutureExt};

fn async_fn(decoy: &Decoy, name: &str) -> decoy::Spy {
    decoy.mock(Spec::function(name).param("key").asynchronous())
}

#[test]
fn awaited_rehearsals_stub_like_sync_ones() {
    block_on(async {
        let decoy = Decoy::new();
        let m = async_fn(&decoy, "m");

        decoy.when(m.call_async(args!["x"]).await).then_return(7);

        assert_eq!(m.call_async(args!["x"]).await.returned::<i32>(), Some(7));
        decoy.verify(&m).times(1).called_with(args!["x"]);
    });
}

#[test]
fn records_publish_at_call_time() {
    let decoy = Decoy::new();
    let m = async_fn(&decoy, "m");

    let pending = m.call_async(args!["early"]);

    // the interaction is already visible before the future is polled
    decoy.verify(&m).times(1).called_with(args!["early"]);
    drop(pending);
}

#[test]
fn actions_resolve_at_await_time() {
    let decoy = Decoy::new();
    let m = async_fn(&decoy, "m");

    let pending = m.call_async(args!["key"]);
    // installed after the call, before the await: still governs the result
    decoy.when(&m).called_with(args!["key"]).then_return(9);

    assert_eq!(block_on(pending).returned::<i32>(), Some(9));
}

#[test]
fn async_do_actions_run_their_future() {
    let decoy = Decoy::new();
    let m = async_fn(&decoy, "m");

    decoy.when(&m).called_with(args![2]).then_do_async(|call| {
        let n = call.positional()[0].cloned::<i32>().expect("an i32");
        async move { Value::of(n * 3) }.boxed()
    });

    assert_eq!(block_on(m.call_async(args![2])).returned::<i32>(), Some(6));
}

#[test]
fn async_raises_propagate_at_extraction() {
    block_on(async {
        let decoy = Decoy::new();
        let m = async_fn(&decoy, "m");

        decoy
            .when(m.call_async(args!["k"]).await)
            .then_raise(std::io::Error::new(std::io::ErrorKind::Other, "boom"));

        let error = m
            .call_async(args!["k"])
            .await
            .result()
            .expect_err("stubbed to raise");
        assert_eq!(error.to_string(), "boom");
    });
}

#[test]
#[should_panic(expected = "async mismatch")]
fn sync_specs_reject_the_async_surface() {
    let decoy = Decoy::new();
    let m = decoy.mock(Spec::function("m"));
    let _ = m.call_async(args![]);
}
