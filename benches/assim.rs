use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use laiassim::{
    assim::{AssimilationEngine, AssimilationSettings},
    ensemble::EnsembleSlice,
    mosaic::MosaicAssembler,
    tiling::{BlockGrid, BlockSpec},
};
use ndarray::{Array1, Array2, Array3};
use rand::{Rng, SeedableRng};
use rand_distr::Uniform;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::{hint::black_box, time::Duration};

const ENSEMBLE_SIZE: usize = 512;
const STEPS: usize = 6;
const TILE: usize = 128;

fn benchmark_assim_f32(c: &mut Criterion) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

    let lai = Uniform::new(0.0, 8.0).unwrap();
    let yields = Uniform::new(2000.0, 9000.0).unwrap();
    let observed = Uniform::new(-1.0, 9.0).unwrap();

    let ensemble = EnsembleSlice::<f32>::from_arrays(
        Array2::from_shape_simple_fn((ENSEMBLE_SIZE, STEPS), || rng.sample(&lai)),
        Array1::from_shape_simple_fn(ENSEMBLE_SIZE, || rng.sample(&yields)),
    )
    .unwrap();

    let tile = Array3::<f32>::from_shape_simple_fn((STEPS, TILE, TILE), || rng.sample(&observed));

    let spec = BlockSpec {
        x_offset: 0,
        y_offset: 0,
        valid_width: TILE,
        valid_height: TILE,
    };

    let engine = AssimilationEngine::<f32>::new(AssimilationSettings::default()).unwrap();

    let mut group = c.benchmark_group("assim_bench");

    group
        .significance_level(0.05)
        .sample_size(50)
        .measurement_time(Duration::from_secs(5));

    group.throughput(Throughput::Elements((TILE * TILE * ENSEMBLE_SIZE) as u64));
    group.bench_function("assim_tile", |b| {
        b.iter(|| {
            engine
                .assimilate(black_box(&spec), black_box(tile.view()), black_box(&ensemble))
                .unwrap();
        });
    });

    let grid = BlockGrid::new(8 * TILE, 8 * TILE, (TILE, TILE));
    let result = engine.assimilate(&spec, tile.view(), &ensemble).unwrap();

    group.throughput(Throughput::Elements(grid.len() as u64));
    group.bench_function("assim_reassemble", |b| {
        b.iter(|| {
            MosaicAssembler::reassemble(
                grid,
                grid.specs().map(|spec| {
                    let mut tile_result = result.clone();
                    tile_result.spec = spec;
                    tile_result
                }),
            )
            .unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_assim_f32);
criterion_main!(benches);
