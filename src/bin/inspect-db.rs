use anyhow::{anyhow, Context, Result};
use burn::backend::{ndarray::NdArrayDevice, NdArray};
use burn::config::Config;
use dotenv::dotenv;
use multi_task_utils as source;
use source::{
    config::{DatasetConfigs, DatasetParams},
    data::{get_dataset, image::Image},
    utils::{get_env, rescale, show_image_terminal_color, Stats},
};

/// Batches of the validation loader used for the pixel statistics.
const STATS_BATCHES: usize = 4;

fn main() -> Result<()> {
    dotenv()?;

    let config_path = get_env("DATASET_CONFIG")?;
    let configs = DatasetConfigs::load(&config_path)
        .map_err(|err| anyhow!("loading `{config_path}`: {err:?}"))?;
    let params = DatasetParams::new(get_env("DATASET")?);

    std::fs::create_dir_all("./out").context("creating ./out")?;

    let device = NdArrayDevice::Cpu;
    let loaders = get_dataset::<NdArray>(&params, &configs, &device)?;

    for (name, split) in loaders.named() {
        println!(
            "{name}: train {} / val {} / test {}",
            split.train_len, split.val_len, split.test_len
        );

        let batch = split
            .train
            .iter()
            .next()
            .context(format!("{name}: empty train loader"))?;
        let [n, c, h, w] = batch.img.shape().dims;
        println!("img: {:?}, labels: {:?}", [n, c, h, w], batch.labels.shape().dims);

        // sample an image
        let labels = batch.labels.clone().into_data().convert::<i64>().value;
        let num_labels = labels.len() / n;
        println!("labels: {:?}", &labels[..num_labels]);

        let img = batch.img.into_data().convert::<f32>().value;
        let image = rescale(&Image::from_chw(&img[..c * h * w], c, h, w));
        show_image_terminal_color(&image);
        let out = format!("./out/example-{name}.png");
        image.to_dynamic().save(&out).context(format!("saving {out}"))?;

        // calculate stats
        let stats = Stats::from_iter(split.val.iter().take(STATS_BATCHES).flat_map(|batch| {
            let [n, c, h, w] = batch.img.shape().dims;
            let values = batch.img.into_data().convert::<f32>().value;
            (0..n)
                .map(|i| {
                    let size = c * h * w;
                    Image::from_chw(&values[i * size..(i + 1) * size], c, h, w)
                })
                .collect::<Vec<_>>()
        }));
        println!("{:#?}", stats);
    }

    Ok(())
}
