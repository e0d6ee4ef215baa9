use crossbeam::channel;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_blocks::blocks::{Accumulator, ReorderSettings, Window, WindowSettings};
use stream_blocks::{
    Block, BlockError, BlockOptions, DataflowBlock, LinkOptions, MapStage, PipelineBuilder,
    Result as BlockResult, Source, Stage, Target,
};

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn test_single_stage_pipeline() {
    let pipeline = PipelineBuilder::new()
        .expect("Pipeline build failed")
        .build();

    for i in 0..5u8 {
        pipeline.submit(vec![i]).expect("Submit failed");
    }
    pipeline.complete();

    assert_eq!(pipeline.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(pipeline.receive_all().len(), 5);
}

#[test]
fn test_multi_stage_pipeline() {
    let pipeline = PipelineBuilder::new()
        .expect("Pipeline build failed")
        .map(|data: Vec<u8>| Ok(data[0] as u32))
        .expect("map")
        .filter(|value| Ok(value % 2 == 0))
        .expect("filter")
        .flat_map(|value| Ok(vec![value; 2]))
        .expect("flat_map")
        .build();

    for i in 0..10u8 {
        pipeline.submit(vec![i]).expect("Submit failed");
    }
    pipeline.complete();

    assert_eq!(pipeline.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(
        pipeline.receive_all(),
        vec![0, 0, 2, 2, 4, 4, 6, 6, 8, 8]
    );
}

#[test]
fn test_for_each_sees_every_item() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let pipeline = PipelineBuilder::new()
        .expect("Pipeline build failed")
        .for_each(move |i: i32| {
            sink.lock().push(i);
            Ok(())
        })
        .expect("for_each")
        .build();

    for i in 0..50 {
        pipeline.submit(i).expect("Submit failed");
    }
    pipeline.complete();

    assert_eq!(pipeline.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
}

#[test]
fn test_custom_stage() {
    struct RunningTotal {
        total: i64,
    }

    impl Stage for RunningTotal {
        type Input = i64;
        type Output = i64;

        fn process(&mut self, input: i64) -> BlockResult<Vec<i64>> {
            self.total += input;
            Ok(vec![self.total])
        }

        fn on_complete(&mut self) -> BlockResult<Vec<i64>> {
            Ok(vec![-1])
        }

        fn name(&self) -> &str {
            "running_total"
        }
    }

    let pipeline = PipelineBuilder::new()
        .expect("Pipeline build failed")
        .stage(RunningTotal { total: 0 })
        .expect("stage")
        .build();

    for i in 1..=4 {
        pipeline.submit(i).expect("Submit failed");
    }
    pipeline.complete();

    assert_eq!(pipeline.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(pipeline.receive_all(), vec![1, 3, 6, 10, -1]);
}

#[derive(Debug)]
struct Count {
    window: Window,
    items: usize,
}

impl Accumulator for Count {
    fn open(window: Window) -> Self {
        Self { window, items: 0 }
    }

    fn window(&self) -> Window {
        self.window
    }
}

#[test]
fn test_reorder_then_window() {
    let pipeline = PipelineBuilder::new()
        .expect("Pipeline build failed")
        .reorder(|item: &(i64, i64)| Ok(item.0), ReorderSettings::default().starting_at(0))
        .expect("reorder")
        .window(
            Duration::from_nanos(10),
            |_: &(i64, i64), count: &mut Count| {
                count.items += 1;
                Ok(())
            },
            |item| Ok(item.1),
            WindowSettings::default(),
        )
        .expect("window")
        .build();

    // (sequence, timestamp), submitted out of order
    for item in [(1, 5), (0, 1), (3, 31), (2, 12)] {
        pipeline.submit(item).expect("Submit failed");
    }
    pipeline.complete();

    assert_eq!(pipeline.completion().wait_timeout(WAIT), Some(Ok(())));
    let windows: Vec<(i64, usize)> = pipeline
        .receive_all()
        .into_iter()
        .map(|count| (count.window().start, count.items))
        .collect();
    assert_eq!(windows, vec![(0, 2), (10, 1), (20, 0), (30, 1)]);
}

#[test]
fn test_bounded_pipeline_suspends_submitter() {
    let (release_tx, release_rx) = channel::bounded::<()>(0);
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let pipeline = PipelineBuilder::with_options(BlockOptions::default().bounded(1))
        .expect("Pipeline build failed")
        .for_each(move |_: u32| {
            let _ = release_rx.recv();
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .expect("for_each")
        .build();

    let accepted = Arc::new(AtomicUsize::new(0));
    let producer = {
        let pipeline = pipeline.clone();
        let accepted = Arc::clone(&accepted);
        std::thread::spawn(move || {
            for i in 0..40 {
                pipeline.submit(i).expect("Submit failed");
                accepted.fetch_add(1, Ordering::SeqCst);
            }
            pipeline.complete();
        })
    };

    std::thread::sleep(Duration::from_millis(200));
    // One item in hand and one queued per bounded block.
    assert!(accepted.load(Ordering::SeqCst) <= 4);

    drop(release_tx);
    producer.join().expect("producer panicked");
    assert_eq!(pipeline.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(processed.load(Ordering::SeqCst), 40);
}

#[test]
fn test_batch_step() {
    let pipeline = PipelineBuilder::new()
        .expect("Pipeline build failed")
        .batch(3)
        .expect("batch")
        .build();

    for i in 0..7 {
        pipeline.submit(i).expect("Submit failed");
    }
    pipeline.complete();

    assert_eq!(pipeline.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(
        pipeline.receive_all(),
        vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
    );
}

#[test]
fn test_aggregate_step() {
    let squares = Block::new(MapStage::new("square", |i: i64| Ok(i * i))).expect("block");
    let pipeline = PipelineBuilder::new()
        .expect("Pipeline build failed")
        .aggregate(squares, |input: i64, square: i64| Ok(format!("{input}^2={square}")))
        .expect("aggregate")
        .build();

    for i in 1..=3 {
        pipeline.submit(i).expect("Submit failed");
    }
    pipeline.complete();

    assert_eq!(pipeline.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(pipeline.receive_all(), vec!["1^2=1", "2^2=4", "3^2=9"]);
}

#[test]
fn test_linking_after_output_buffered() {
    let producer = Block::new(MapStage::new("square", |i: i32| Ok(i * i))).expect("block");
    for i in 1..=3 {
        producer.submit(i).expect("Submit failed");
    }
    producer.complete();
    producer.completion().wait_timeout(WAIT).expect("timed out").expect("faulted");

    // Output produced before the link existed is delivered on link, then completion.
    let consumer = Block::new(stream_blocks::Buffer::new()).expect("block");
    producer.link_to(Arc::new(consumer.clone()), LinkOptions::propagate());

    assert_eq!(consumer.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(consumer.receive_all(), vec![1, 4, 9]);
}

#[test]
fn test_link_filter_routes_to_first_acceptor() {
    let source = Block::new(stream_blocks::Buffer::new()).expect("block");
    let small = Block::new(stream_blocks::Buffer::new()).expect("block");
    let large = Block::new(stream_blocks::Buffer::new()).expect("block");
    source.link_to(
        Arc::new(small.clone()),
        LinkOptions::propagate().with_filter(|i: &i32| *i < 10),
    );
    source.link_to(Arc::new(large.clone()), LinkOptions::propagate());

    for i in [1, 20, 3, 40] {
        source.submit(i).expect("Submit failed");
    }
    source.complete();

    assert_eq!(small.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(large.completion().wait_timeout(WAIT), Some(Ok(())));
    assert_eq!(small.receive_all(), vec![1, 3]);
    assert_eq!(large.receive_all(), vec![20, 40]);
}

#[test]
fn test_metrics_collection() {
    let block = Block::new(MapStage::new("noop", |i: u32| Ok(i))).expect("block");
    for i in 0..100 {
        block.submit(i).expect("Submit failed");
    }
    block.complete();
    block.completion().wait_timeout(WAIT).expect("timed out").expect("faulted");

    let snapshot = block.metrics().snapshot();
    assert_eq!(snapshot.received, 100);
    assert_eq!(snapshot.emitted, 100);
    assert!(snapshot.throughput_mps > 0.0);
}

#[tokio::test]
async fn test_await_pipeline_completion() {
    let pipeline = PipelineBuilder::new()
        .expect("Pipeline build failed")
        .map(|i: i32| Ok(i + 1))
        .expect("map")
        .build();
    pipeline.submit(1).expect("Submit failed");
    pipeline.fault(BlockError::fault("cancelled"));

    let outcome = tokio::time::timeout(WAIT, pipeline.completion())
        .await
        .expect("timed out");
    assert_eq!(outcome, Err(BlockError::fault("cancelled")));
}
