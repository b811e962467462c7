//! Build script for framequeue.
//!
//! Emits feature-combination diagnostics so integrators notice when a
//! configuration is likely not what they wanted.

use std::env;

fn main() {
    // Re-run if features change
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_GPU_VULKAN");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_LOG");

    let vulkan_enabled = env::var("CARGO_FEATURE_GPU_VULKAN").is_ok();
    let parking_lot_enabled = env::var("CARGO_FEATURE_PARKING_LOT").is_ok();

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let is_release = profile == "release";

    if vulkan_enabled {
        emit_info("Vulkan backend enabled (ash)");
        emit_note("The logical device must outlive the dispatcher:");
        emit_note("  let device = VulkanDevice::new(ash_device.clone());");
        emit_note("  let dispatcher = QueueDispatcher::new(Arc::new(device), &families)?;");
    }

    if parking_lot_enabled {
        emit_info("Using parking_lot for queue and pool mutexes");
    } else if is_release {
        emit_note("Tip: enable 'parking_lot' to shorten queue-lock hold times:");
        emit_note("  framequeue = { version = \"0.5\", features = [\"parking_lot\"] }");
    }
}

fn emit_info(msg: &str) {
    println!("cargo:warning=[framequeue] {}", msg);
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[framequeue]    {}", msg);
}
