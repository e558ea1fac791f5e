// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytesize::ByteSize;
use serde::Deserialize;

/// Settings for capturing and compressing test output: the `[output]` table.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OutputSettings {
    compress_threshold: ByteSize,
    compression_level: i32,
    max_size: ByteSize,
    excerpt_size: ByteSize,
}

impl OutputSettings {
    /// Output larger than this many bytes is compressed before being reported.
    pub fn compress_threshold(&self) -> usize {
        to_usize(self.compress_threshold)
    }

    /// The zstd compression level.
    pub fn compression_level(&self) -> i32 {
        self.compression_level
    }

    /// Output beyond this many bytes is discarded.
    pub fn max_size(&self) -> usize {
        to_usize(self.max_size)
    }

    /// Size of the trailing excerpt kept verbatim alongside compressed output.
    pub fn excerpt_size(&self) -> usize {
        to_usize(self.excerpt_size)
    }

    #[cfg(test)]
    pub(crate) fn for_test(compress_threshold: usize, max_size: usize) -> Self {
        Self {
            compress_threshold: ByteSize::b(compress_threshold as u64),
            compression_level: 3,
            max_size: ByteSize::b(max_size as u64),
            excerpt_size: ByteSize::b(64),
        }
    }
}

fn to_usize(size: ByteSize) -> usize {
    usize::try_from(size.as_u64()).unwrap_or(usize::MAX)
}
