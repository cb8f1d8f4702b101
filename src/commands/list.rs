//! List commands implementation

use boardflash_flash::{available_backends, BackendRegistry};

/// List attached boards
pub fn list_devices(
    registry: &BackendRegistry,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let devices = registry.list_devices();

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }

    println!(
        "{:<48} {:<20} {:<24} {}",
        "Target ID", "Platform", "Mount point", "Serial port"
    );
    println!("{}", "-".repeat(110));

    for device in &devices {
        let mount_point = device
            .mount_point
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<48} {:<20} {:<24} {}",
            device.target_id,
            device.platform_name,
            mount_point,
            device.serial_port.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// List all compiled-in backends
pub fn list_backends() {
    println!("Supported backends:");
    println!();
    for backend in available_backends() {
        println!(
            "  {:<8} [{}] - {}",
            backend.name,
            backend.methods.join(", "),
            backend.description
        );
    }
}

/// List all platforms some backend can flash
pub fn list_platforms(registry: &BackendRegistry) {
    println!("Supported platforms:");
    println!();
    for platform in registry.supported_platforms() {
        let backends: Vec<&str> = registry
            .backends()
            .filter(|b| b.supported_platforms().contains(&platform))
            .map(|b| b.name())
            .collect();
        println!("  {:<20} {}", platform, backends.join(", "));
    }
}
