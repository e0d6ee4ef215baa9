use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use stream_blocks::{
    BlockOptions, Capacity, DataflowBlock, PartitionSelector, PipelineBuilder, Target,
};

fn slow_consumer(c: &mut Criterion, name: &str, capacity: Capacity) {
    c.bench_function(name, |b| {
        b.iter(|| {
            let pipeline = PipelineBuilder::new()
                .expect("Build failed")
                .with_capacity(capacity)
                .map(|data: Vec<u8>| Ok(data))
                .expect("Build failed")
                .for_each(|data| {
                    std::thread::sleep(Duration::from_micros(100));
                    black_box(data);
                    Ok(())
                })
                .expect("Build failed")
                .build();

            for i in 0..1000 {
                let _ = pipeline.submit(black_box(vec![i as u8; 64]));
            }
            pipeline.complete();
            let _ = pipeline.completion().wait();
        });
    });
}

fn benchmark_backpressure_slow_consumer(c: &mut Criterion) {
    slow_consumer(c, "bounded_slow_consumer_1000_msgs", Capacity::Bounded(100));
}

fn benchmark_without_backpressure(c: &mut Criterion) {
    slow_consumer(c, "unbounded_slow_consumer_1000_msgs", Capacity::Unbounded);
}

fn benchmark_slow_partition_throttles_dispatch(c: &mut Criterion) {
    c.bench_function("bounded_partitions_one_slow_2000_msgs", |b| {
        b.iter(|| {
            let pipeline = PipelineBuilder::new()
                .expect("Build failed")
                .partition(
                    [0u32, 1],
                    PartitionSelector::single(|i: &u32| Ok(i % 2)),
                    |key| {
                        let slow = *key == 1;
                        Ok(PipelineBuilder::with_options(BlockOptions::default().bounded(16))?
                            .for_each(move |i: u32| {
                                if slow {
                                    std::thread::sleep(Duration::from_micros(50));
                                }
                                black_box(i);
                                Ok(())
                            })?
                            .build())
                    },
                )
                .expect("Build failed")
                .build();

            for i in 0..2000 {
                let _ = pipeline.submit(black_box(i));
            }
            pipeline.complete();
            let _ = pipeline.completion().wait();
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(15))
        .sample_size(20);
    targets = benchmark_backpressure_slow_consumer, benchmark_without_backpressure, benchmark_slow_partition_throttles_dispatch
);
criterion_main!(benches);
