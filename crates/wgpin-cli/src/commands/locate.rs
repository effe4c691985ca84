// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::LocateArgs;
use crate::host;
use console::style;
use std::os::fd::AsRawFd;
use wgpin_session::{SessionError, DESCRIPTOR_SCAN_LIMIT};

pub fn handle(args: LocateArgs) -> anyhow::Result<()> {
	// Held until the scan is done; dropping it removes the interface.
	let _created = if args.create {
		let (fd, name) = host::create_interface(&args.interface)?;
		println!(
			"{} Created {} on descriptor {}",
			style("→").yellow(),
			style(&name).cyan(),
			fd.as_raw_fd()
		);
		Some(fd)
	} else {
		None
	};

	let locator = host::locator(&args.interface)?;
	match locator.locate_control_interface() {
		Ok(mut descriptor) => {
			let name = locator.interface_name(&descriptor);
			println!(
				"{} Tunnel interface {} on descriptor {}",
				style("✓").green().bold(),
				style(&name).cyan(),
				style(descriptor.fd()).cyan()
			);
			descriptor.release();
			Ok(())
		}
		Err(SessionError::InterfaceNotFound) => {
			println!(
				"{} No tunnel interface among descriptors 0..{}",
				style("✗").red().bold(),
				DESCRIPTOR_SCAN_LIMIT
			);
			Err(SessionError::InterfaceNotFound.into())
		}
		Err(e) => Err(e.into()),
	}
}
