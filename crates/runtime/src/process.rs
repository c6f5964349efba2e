//! Process and port lifecycle helpers.

/// Asks the OS for an unused localhost port.
pub fn free_port() -> std::io::Result<u16> {
	let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
	Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn free_port_is_bindable() {
		let port = free_port().unwrap();
		assert_ne!(port, 0);
		assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
	}
}
