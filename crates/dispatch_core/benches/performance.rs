//! Performance benchmarks for dispatch_core using Criterion.rs.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use dispatch_core::config::EngineConfig;
use dispatch_core::eligibility::{DriverDirectory, InMemoryDriverDirectory};
use dispatch_core::fare::VehicleClass;
use dispatch_core::location::{LocationStore, PositionUpdate};
use dispatch_core::matching::GeoMatcher;
use dispatch_core::notify::NoopDispatcher;
use dispatch_core::test_helpers::{eligible_driver, test_origin};

fn populated_matcher(num_drivers: usize, seed: u64) -> GeoMatcher {
    let locations = Arc::new(LocationStore::new(Arc::new(NoopDispatcher)));
    let directory = Arc::new(InMemoryDriverDirectory::new());
    let origin = test_origin();
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..num_drivers {
        let id = Uuid::new_v4();
        directory.upsert(id, eligible_driver(VehicleClass::Sedan));
        let update = PositionUpdate {
            latitude: origin.lat + rng.gen_range(-0.1..0.1),
            longitude: origin.lng + rng.gen_range(-0.1..0.1),
            speed_kmh: Some(rng.gen_range(0.0..60.0)),
            ..Default::default()
        };
        locations.upsert_driver(id, update).expect("upsert");
    }

    GeoMatcher::new(
        locations,
        directory as Arc<dyn DriverDirectory>,
        Arc::new(EngineConfig::default()),
    )
}

fn bench_nearby_scan(c: &mut Criterion) {
    // Upserts spawn notification tasks, so populate inside a runtime.
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let _guard = rt.enter();

    let mut group = c.benchmark_group("nearby_scan");
    for num_drivers in [100usize, 1_000, 10_000] {
        let matcher = populated_matcher(num_drivers, 42);
        let origin = test_origin();
        group.bench_with_input(
            BenchmarkId::from_parameter(num_drivers),
            &num_drivers,
            |b, _| {
                b.iter(|| black_box(matcher.nearby(origin, 10.0, None).expect("nearby")));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_nearby_scan);
criterion_main!(benches);
