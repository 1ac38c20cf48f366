use anyhow::{Result, anyhow, bail};

/// Convert macOS /dev/tty.* ports to /dev/cu.* ports
pub fn normalize_port_name(port_name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        if let Some(rest) = port_name.strip_prefix("/dev/tty.") {
            return format!("/dev/cu.{}", rest);
        }
    }
    port_name.to_string()
}

/// Fail early with the list of usable ports when `port_name` is not one of them.
pub fn check_port_available(port_name: &str) -> Result<()> {
    let ports = serialport::available_ports()
        .map_err(|e| anyhow!("Failed to get available ports list: {}", e))?;

    let usable: Vec<String> = ports
        .into_iter()
        .map(|p| p.port_name)
        .filter(|name| !cfg!(target_os = "macos") || !name.starts_with("/dev/tty."))
        .collect();

    if usable.iter().any(|name| name == port_name) {
        return Ok(());
    }

    bail!(
        "The specified port '{}' does not exist. Available ports: {}",
        port_name,
        if usable.is_empty() {
            "No available ports".to_string()
        } else {
            usable.join(", ")
        }
    )
}
