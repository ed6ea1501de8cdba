//! mlpipe-rs demo runner
//!
//! Builds an in-memory graph (app source → valve → switch → two sinks),
//! drives it through a few frames with valve and switch changes, then prints
//! the registry snapshot as JSON.

use anyhow::Context;
use mlpipe_rs::{
    backend::{MemoryEngine, MemoryGraphBuilder},
    config::RegistryConfig,
    logging,
    pipeline::Pipeline,
    types::{ElementRole, TensorInfo, TensorType, TensorsData, TensorsInfo},
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const FRAME_BYTES: u32 = 4;

fn frame(tag: u8) -> TensorsData {
    TensorsData::single(vec![tag; FRAME_BYTES as usize])
}

fn counting_sink(name: &'static str) -> (Arc<AtomicUsize>, impl Fn(&TensorsData) + Send + Sync) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let callback = move |data: &TensorsData| {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::info!(sink = name, bytes = data.total_bytes(), "Frame received");
    };
    (count, callback)
}

fn main() -> anyhow::Result<()> {
    let config = RegistryConfig::load_or_default();
    let _log_guard = logging::init(&config.logging).context("Failed to initialize logging")?;

    tracing::info!("Starting mlpipe-rs demo");

    let engine = Arc::new(MemoryEngine::new());
    let graph = engine.instantiate(
        MemoryGraphBuilder::new()
            .element("src", ElementRole::AppSrc)
            .tensors(
                "src",
                TensorsInfo::new(vec![
                    TensorInfo::new(TensorType::UInt8, &[FRAME_BYTES]).with_name("frame")
                ]),
            )
            .element("valve", ElementRole::Valve)
            .element("switch", ElementRole::SwitchOutput)
            .switch_pads("switch", &["src_0", "src_1"])
            .element("sink_a", ElementRole::Sink)
            .element("sink_b", ElementRole::AppSink)
            .link("src", "valve")
            .link("valve", "switch")
            .link_pad("switch", "sink_a", "src_0")
            .link_pad("switch", "sink_b", "src_1"),
    );

    let pipeline =
        Pipeline::with_config(engine, graph, config).context("Failed to wrap graph")?;

    let (count_a, on_a) = counting_sink("sink_a");
    let (count_b, on_b) = counting_sink("sink_b");
    let _sink_a = pipeline.register_sink("sink_a", on_a)?;
    let sink_b = pipeline.register_sink("sink_b", on_b)?;

    let src = pipeline.src_handle("src")?;
    let valve = pipeline.valve_handle("valve")?;
    let switch = pipeline.switch_handle("switch")?;
    tracing::info!("Switch pads: {:?}", switch.pad_names()?);
    tracing::info!("Source format: {:?}", src.tensors_info()?);

    pipeline.start().context("Failed to start pipeline")?;

    src.input_data(frame(0))?;
    switch.select("src_1")?;
    src.input_data(frame(1))?;
    valve.set_open(false)?;
    src.input_data(frame(2))?;
    valve.set_open(true)?;
    switch.select("src_0")?;
    src.input_data(frame(3))?;

    let snapshot = pipeline.snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?
    );
    tracing::info!(
        sink_a = count_a.load(Ordering::Relaxed),
        sink_b = count_b.load(Ordering::Relaxed),
        "Frames delivered"
    );

    sink_b.release()?;
    pipeline.destroy()?;
    tracing::info!(src_valid = src.is_valid(), "Pipeline destroyed");

    Ok(())
}
