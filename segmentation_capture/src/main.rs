use segmentation_capture::{config, opencv_device::OpencvProvider, start_app};
use segmentation_detector::OrtSegmentationModel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration()?;
    let log_level = &format!("{},ort=info", config.log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_level(true)
                .with_thread_names(true),
        )
        .init();

    let model = match OrtSegmentationModel::new(&config.model) {
        Ok(model) => model,
        Err(e) => {
            tracing::error!("Failed to load model {:?}: {}", config.model.get_path(), e);
            return Err(e);
        }
    };
    let provider = OpencvProvider::new(&config.camera);

    start_app(config, &provider, model).await?;

    Ok(())
}
