mod common;
use common::{eventually, outputs, publisher, subscriber, within};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tubecast::{
    pubsub::{PubSub, RoundRobin},
    Channel, PumpError,
};

type Sub = (JoinHandle<Result<(), PumpError>>, JoinHandle<Vec<u8>>);

fn spawn_sub(relay: &RoundRobin, ctx: &CancellationToken, id: &str, topic: &str) -> Sub {
    let (stream, collected) = subscriber();
    let (relay, ctx, id, topic) = (relay.clone(), ctx.clone(), id.to_owned(), topic.to_owned());
    let task = tokio::spawn(async move {
        relay
            .subscribe(&ctx, id, stream, &[Channel::shared(topic)], true)
            .await
    });
    (task, collected)
}

async fn finish(subs: Vec<Sub>) -> Vec<usize> {
    let mut counts = Vec::new();
    for (task, collected) in subs {
        within("subscriber", task).await.unwrap().unwrap();
        counts.push(collected.await.unwrap().len());
    }
    counts
}

#[tokio::test]
async fn messages_rotate_across_subscribers() {
    let relay = RoundRobin::new();
    let ctx = CancellationToken::new();

    let subs: Vec<_> = ["c", "a", "b"]
        .into_iter()
        .map(|id| spawn_sub(&relay, &ctx, id, "rr"))
        .collect();
    eventually("subscribers", || outputs(relay.broker(), "rr") == 3).await;

    for i in 0..9 {
        relay
            .publish(
                &ctx,
                format!("pub-{i}"),
                publisher(b"m").await,
                &[Channel::shared("rr")],
                true,
            )
            .await
            .unwrap();
    }

    ctx.cancel();
    // one byte per message
    assert_eq!(finish(subs).await, vec![3, 3, 3]);
}

#[tokio::test]
async fn topics_rotate_independently() {
    let relay = RoundRobin::new();
    let ctx = CancellationToken::new();

    let first = vec![
        spawn_sub(&relay, &ctx, "a", "t1"),
        spawn_sub(&relay, &ctx, "b", "t1"),
    ];
    let second = vec![
        spawn_sub(&relay, &ctx, "a", "t2"),
        spawn_sub(&relay, &ctx, "b", "t2"),
    ];
    eventually("subscribers", || {
        outputs(relay.broker(), "t1") == 2 && outputs(relay.broker(), "t2") == 2
    })
    .await;

    // a single read is handed to both topics
    relay
        .publish(
            &ctx,
            "pub",
            publisher(b"z").await,
            &[Channel::shared("t1"), Channel::shared("t2")],
            true,
        )
        .await
        .unwrap();

    ctx.cancel();
    assert_eq!(finish(first).await, vec![1, 0]);
    assert_eq!(finish(second).await, vec![1, 0]);
}
