//! Maps image file names to the container format used for a transfer.
use crate::error::ConfigError;
use std::fmt;
use std::path::Path;

/// The direction of a transfer, seen from the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Read the disk in the drive into an image file.
    Read,
    /// Write an image file onto the disk in the drive.
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// A supported image container format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Amiga Disk File, raw AmigaDOS sectors.
    Adf,
    /// PC sector image (`.img` / `.ima`).
    Img,
    /// Atari ST sector image.
    St,
    /// SuperCard Pro flux stream.
    Scp,
    /// Interchangeable Preservation Format. Write only.
    Ipf,
}

impl Mode {
    /// Returns `true` for the flux/bit-stream formats that carry their own
    /// geometry and density and therefore skip density detection.
    pub fn is_self_describing(self) -> bool {
        matches!(self, Mode::Scp | Mode::Ipf)
    }

    /// Returns `true` if the format can be produced by reading a disk.
    pub fn is_readable(self) -> bool {
        !matches!(self, Mode::Ipf)
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Adf => "ADF",
            Mode::Img => "IMG",
            Mode::St => "ST",
            Mode::Scp => "SCP",
            Mode::Ipf => "IPF",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Extension table. Matching is case-insensitive.
const EXTENSIONS: &[(&str, Mode)] = &[
    ("adf", Mode::Adf),
    ("img", Mode::Img),
    ("ima", Mode::Img),
    ("st", Mode::St),
    ("scp", Mode::Scp),
    ("ipf", Mode::Ipf),
];

/// Resolves the container format for `path` from its final extension.
///
/// The lookup is deterministic and has no side effects; in particular it does
/// not check whether the file exists.
///
/// # Errors
///
/// Returns [`ConfigError::EmptyPath`] for an empty path and
/// [`ConfigError::UnsupportedFormat`] if the extension is missing, unknown, or
/// names a write-only format while `direction` is [`Direction::Read`].
pub fn resolve(path: &Path, direction: Direction) -> Result<Mode, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::EmptyPath);
    }

    let unsupported = || ConfigError::UnsupportedFormat {
        path: path.to_path_buf(),
        direction,
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(unsupported)?
        .to_lowercase();

    let mode = EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, mode)| *mode)
        .ok_or_else(unsupported)?;

    if direction == Direction::Read && !mode.is_readable() {
        return Err(unsupported());
    }

    Ok(mode)
}

/// The extensions accepted for `direction`, in display order.
pub fn supported_extensions(direction: Direction) -> impl Iterator<Item = &'static str> {
    EXTENSIONS
        .iter()
        .filter(move |(_, mode)| direction == Direction::Write || mode.is_readable())
        .map(|(ext, _)| *ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_case_insensitively() {
        for name in ["IMAGE.ADF", "image.adf", "Image.Adf"] {
            assert_eq!(resolve(Path::new(name), Direction::Write).unwrap(), Mode::Adf);
            assert_eq!(resolve(Path::new(name), Direction::Read).unwrap(), Mode::Adf);
        }
    }

    #[test]
    fn ima_is_an_alias_of_img() {
        assert_eq!(resolve(Path::new("dos.ima"), Direction::Read).unwrap(), Mode::Img);
        assert_eq!(resolve(Path::new("dos.IMG"), Direction::Write).unwrap(), Mode::Img);
    }

    #[test]
    fn uses_the_final_extension_only() {
        assert_eq!(
            resolve(Path::new("/tmp/backup.v2.st"), Direction::Read).unwrap(),
            Mode::St
        );
        assert!(resolve(Path::new("disk.adf.bak"), Direction::Write).is_err());
    }

    #[test]
    fn ipf_is_write_only() {
        assert_eq!(resolve(Path::new("game.ipf"), Direction::Write).unwrap(), Mode::Ipf);
        assert!(matches!(
            resolve(Path::new("game.ipf"), Direction::Read),
            Err(ConfigError::UnsupportedFormat { direction: Direction::Read, .. })
        ));
    }

    #[test]
    fn rejects_unknown_and_missing_extensions() {
        assert!(matches!(
            resolve(Path::new("test.xyz"), Direction::Write),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            resolve(Path::new("README"), Direction::Read),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            resolve(Path::new(""), Direction::Read),
            Err(ConfigError::EmptyPath)
        ));
    }

    #[test]
    fn read_extensions_exclude_ipf() {
        let read: Vec<_> = supported_extensions(Direction::Read).collect();
        assert_eq!(read, ["adf", "img", "ima", "st", "scp"]);
        assert!(supported_extensions(Direction::Write).any(|e| e == "ipf"));
    }
}
