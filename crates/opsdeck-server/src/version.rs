// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build information for `opsdeck-server version`.

/// Format version info for display.
pub fn format_version_info() -> String {
	format!(
		"opsdeck-server version: {}\n\
         Platform:               {}-{}\n\
         Job kinds:              {}",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::OS,
		std::env::consts::ARCH,
		opsdeck_server::JobKind::ALL
			.iter()
			.map(|kind| kind.as_str())
			.collect::<Vec<_>>()
			.join(", "),
	)
}
