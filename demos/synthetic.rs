use chrono::{Days, Local, NaiveDate};
use env_logger::Builder;
use laiassim::{
    assim::AssimilationSettingsBuilder,
    ensemble::{Ensemble, EnsembleStore, Location, Trajectory, TrajectorySample},
    matching::DatedSource,
    mosaic::Mosaic,
    pipeline::{OutputSink, PipelineSettingsBuilder, run},
    raster::{GeoTransform, MemoryRaster},
    tiling::RasterStackConfig,
};
use log::info;
use rand::{Rng, SeedableRng};
use rand_distr::{Normal, Uniform};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::{
    fs::{File, create_dir_all},
    io::{self, prelude::*},
    path::{Path, PathBuf},
};

const ENSEMBLE_SIZE: usize = 256;
const WIDTH: usize = 300;
const HEIGHT: usize = 200;

/// Writes the mean and standard deviation grids as raw little-endian f32 files.
struct RawFileSink {
    path: PathBuf,
}

impl OutputSink<f32> for RawFileSink {
    fn write(&mut self, mosaic: &Mosaic<f32>, config: &RasterStackConfig) -> io::Result<()> {
        create_dir_all(&self.path)?;

        for (name, grid) in [("mean", &mosaic.mean), ("std", &mosaic.std)] {
            let mut file = File::create(self.path.join(format!("yield_{}.f32", name)))?;

            for value in grid.iter() {
                file.write_all(&value.to_le_bytes())?;
            }
        }

        let mut header = File::create(self.path.join("yield.json"))?;

        header.write_all(serde_json::to_string_pretty(config)?.as_bytes())?;

        Ok(())
    }
}

/// A logistic LAI curve peaking at `peak` around day `mid` of the season.
fn lai_curve(day: f32, peak: f32, mid: f32) -> f32 {
    peak / (1.0 + (-(day - mid) / 12.0).exp()) * (1.0 - day / 300.0).max(0.0)
}

fn main() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S.%f"),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .init();

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

    let sowing = NaiveDate::from_ymd_opt(2017, 10, 12).unwrap();
    let time_axis = (0..240_u64)
        .map(|day| sowing + Days::new(day))
        .collect::<Vec<NaiveDate>>();

    let peak_density = Uniform::new(2.0, 7.5).unwrap();
    let mid_density = Uniform::new(150.0, 190.0).unwrap();

    let mut store = EnsembleStore::<f32>::new(time_axis.clone());

    for (lon, lat) in [(115.25, 36.75), (115.75, 36.25)] {
        let ensemble = (0..ENSEMBLE_SIZE)
            .map(|member| {
                let peak = rng.sample(peak_density);
                let mid = rng.sample(mid_density);

                let trajectory = Trajectory::from_iterator(time_axis.iter().enumerate().map(
                    |(day, date)| TrajectorySample {
                        date: *date,
                        lai: lai_curve(day as f32, peak, mid),
                        yield_value: match day {
                            0..200 => 0.0,
                            _ => 1200.0 * peak,
                        },
                    },
                ));

                (member, trajectory)
            })
            .collect::<Ensemble<f32>>();

        store.insert(Location { lon, lat }, ensemble).unwrap();
    }

    // Observed fields: a smooth peak gradient across the scene plus noise, with a cloud band.
    let noise = Normal::new(0.0, 0.3).unwrap();

    let observations = [150_u64, 170, 181, 195, 260]
        .into_iter()
        .map(|day| {
            let mut values = Vec::with_capacity(WIDTH * HEIGHT);

            for row in 0..HEIGHT {
                for col in 0..WIDTH {
                    let peak = 2.5 + 4.5 * col as f32 / WIDTH as f32;

                    values.push(match (day, row) {
                        (170, 80..120) => -1.0,
                        _ => lai_curve(day as f32, peak, 170.0) + rng.sample(noise),
                    });
                }
            }

            let source = MemoryRaster::from_values(WIDTH, HEIGHT, 1, values)
                .unwrap()
                .with_block_size((WIDTH, 1))
                .with_geo_transform(GeoTransform([500000.0, 30.0, 0.0, 4000000.0, 0.0, -30.0]))
                .with_projection("EPSG:32650");

            DatedSource::new(source, sowing + Days::new(day))
        })
        .collect::<Vec<DatedSource<MemoryRaster<f32>>>>();

    let settings = PipelineSettingsBuilder::default()
        .assimilation(
            AssimilationSettingsBuilder::default()
                .threshold(1.0)
                .build()
                .unwrap(),
        )
        .block_size(Some((64, 64)))
        .tile_batch(8)
        .build()
        .unwrap();

    let path = Path::new("./output/synthetic");

    create_dir_all(path).unwrap();
    settings.to_json_file(path.join("settings.json")).unwrap();

    let mut sink = RawFileSink {
        path: path.to_path_buf(),
    };

    let summary = run(observations, &store, &settings, &mut sink, None).unwrap();

    info!(
        "wrote {} valid pixels to {}",
        summary.valid_pixels,
        path.display()
    );
}
