use dataset_loader::{Dataset, DatasetLoader, DEFAULT_SPLIT};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let loader = DatasetLoader::new()?;
    let dataset = loader.load("wikitext", DEFAULT_SPLIT)?;
    println!("loaded {} rows", dataset.len());
    if let Some(row) = dataset.get(0) {
        println!("first row: {row:?}");
    }
    Ok(())
}
