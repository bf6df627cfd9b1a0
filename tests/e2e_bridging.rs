//! End-to-end bridging tests: the rendezvous channel consumed through
//! the async-iterator adapter, and the sequential queue feeding the
//! channel, all driven by the deterministic task factory.

use abridge::channel::AsyncChannel;
use abridge::iter::try_values;
use abridge::publisher::{Completion, Demand, Publisher};
use abridge::queue::AsyncQueue;
use abridge::task::{TaskFactory, TestTaskFactory};
use abridge::test_utils::{block_on, init_test_logging, RecordingSubscriber};
use std::convert::Infallible;
use std::sync::Arc;

type TestChannel = AsyncChannel<u32, Infallible>;

#[test]
fn channel_consumed_through_iterator_rendezvous() {
    init_test_logging();
    let factory = TestTaskFactory::new();
    let channel = TestChannel::new();

    let consumer_channel = channel.clone();
    let consumer = factory.task(None, move |cx| async move {
        let mut iter = try_values(consumer_channel);
        let mut collected = Vec::new();
        loop {
            match iter.next(&cx).await {
                Ok(Some(value)) => collected.push(value),
                Ok(None) => break,
                Err(error) => panic!("unexpected iterator error: {error}"),
            }
        }
        collected
    });

    let producer_channel = channel.clone();
    let producer = factory.task(None, move |cx| async move {
        for value in 0..3 {
            producer_channel.send(&cx, value).await?;
        }
        producer_channel.send_completion(Completion::Finished)
    });

    factory.run_until_idle();

    block_on(producer.join())
        .expect("producer task")
        .expect("sends and completion succeed");
    let collected = block_on(consumer.join()).expect("consumer task");
    assert_eq!(collected, vec![0, 1, 2]);
}

#[test]
fn cancelling_the_consumer_detaches_it_from_the_channel() {
    init_test_logging();
    let factory = TestTaskFactory::new();
    let channel = TestChannel::new();

    let consumer_channel = channel.clone();
    let consumer = factory.task(None, move |cx| async move {
        let mut iter = try_values(consumer_channel);
        iter.next(&cx).await
    });
    factory.run_until_idle();
    assert!(!consumer.is_finished(), "consumer awaits the first value");

    consumer.cancel();
    factory.run_until_idle();
    let err = block_on(consumer.join())
        .expect("consumer task finishes")
        .expect_err("next fails with cancellation");
    assert!(err.is_cancelled());

    // The cancelled subscriber left the live set; with no subscribers the
    // rendezvous predicate can never hold, so a send pends.
    let producer_channel = channel.clone();
    let producer = factory.task(None, move |cx| async move {
        producer_channel.send(&cx, 5).await
    });
    factory.run_until_idle();
    assert!(!producer.is_finished(), "no subscribers, send pends");

    producer.cancel();
    factory.run_until_idle();
    let err = block_on(producer.join())
        .expect("producer task finishes")
        .expect_err("send fails with cancellation");
    assert!(err.is_cancelled());
}

#[test]
fn queue_serializes_channel_sends() {
    init_test_logging();
    let factory = TestTaskFactory::new();
    let channel = TestChannel::new();
    let subscriber = Arc::new(RecordingSubscriber::with_initial_demand(
        Demand::unlimited(),
    ));
    channel.subscribe(Box::new(Arc::clone(&subscriber)));

    let queue = AsyncQueue::new(factory.clone());
    let handles: Vec<_> = (1..=3)
        .map(|value| {
            let channel = channel.clone();
            queue.enqueue(move |cx| async move { channel.send(&cx, value).await })
        })
        .collect();
    factory.run_until_idle();

    for handle in handles {
        block_on(handle.join())
            .expect("queued task")
            .expect("send succeeds");
    }
    assert_eq!(subscriber.values(), vec![1, 2, 3]);
}
