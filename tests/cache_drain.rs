mod common;
use common::{eventually, outputs, within};

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tubecast::{
    cache_drain::{CacheDrain, PurgeQueue, Purger},
    pubsub::{Multicast, PubSub},
    topic::CACHE_DRAIN,
};

#[derive(Debug, Clone, Default)]
struct Recorder {
    purged: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn purged(&self) -> Vec<String> {
        self.purged.lock().unwrap().clone()
    }
}

impl Purger for Recorder {
    async fn purge(&self, key: &str) {
        self.purged.lock().unwrap().push(key.to_owned());
    }

    async fn purge_all(&self) {
        self.purged.lock().unwrap().push("everything".to_owned());
    }
}

#[tokio::test]
async fn queued_keys_reach_the_drain() {
    let relay = Multicast::new();
    let ctx = CancellationToken::new();
    let recorder = Recorder::default();

    let drain = {
        let (relay, ctx, drain) = (relay.clone(), ctx.clone(), CacheDrain::new(recorder.clone()));
        tokio::spawn(async move { drain.run(&relay, &ctx).await })
    };
    eventually("drain", || outputs(relay.broker(), CACHE_DRAIN) == 1).await;

    let queue = PurgeQueue::new();
    queue.enqueue("alice-www");
    queue.enqueue("alice-www");
    queue.enqueue("bob-blog");
    queue.purge_all();
    assert_eq!(queue.len(), 3);

    let flusher = {
        let (relay, ctx, queue) = (relay.clone(), ctx.clone(), queue.clone());
        tokio::spawn(async move {
            queue
                .run_every(&relay, &ctx, Duration::from_millis(20))
                .await
        })
    };

    eventually("purges", || recorder.purged().len() == 3).await;
    assert!(queue.is_empty());

    let mut purged = recorder.purged();
    purged.sort();
    assert_eq!(purged, ["alice-www", "bob-blog", "everything"]);

    // keys queued later go out on the next tick
    queue.enqueue("carol-docs");
    eventually("late purge", || recorder.purged().len() == 4).await;

    ctx.cancel();
    within("flusher", flusher).await.unwrap().unwrap();
    within("drain", drain).await.unwrap();
    assert!(relay.broker().channels().is_empty());
}

#[tokio::test]
async fn every_drain_receives_purges() {
    let relay = Multicast::new();
    let ctx = CancellationToken::new();
    let recorders = [Recorder::default(), Recorder::default()];

    let drains: Vec<_> = recorders
        .iter()
        .map(|recorder| {
            let (relay, ctx, drain) = (relay.clone(), ctx.clone(), CacheDrain::new(recorder.clone()));
            tokio::spawn(async move { drain.run(&relay, &ctx).await })
        })
        .collect();
    eventually("both drains", || outputs(relay.broker(), CACHE_DRAIN) == 2).await;

    let queue = PurgeQueue::new();
    queue.enqueue("k1");
    let flusher = {
        let (relay, ctx, queue) = (relay.clone(), ctx.clone(), queue.clone());
        tokio::spawn(async move {
            queue
                .run_every(&relay, &ctx, Duration::from_millis(20))
                .await
        })
    };

    for recorder in &recorders {
        eventually("purge", || recorder.purged() == ["k1"]).await;
    }

    ctx.cancel();
    within("flusher", flusher).await.unwrap().unwrap();
    for drain in drains {
        within("drain", drain).await.unwrap();
    }
}
