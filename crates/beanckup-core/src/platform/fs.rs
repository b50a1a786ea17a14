use std::fs::Metadata;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};

/// Modification and creation times of an entry as UTC instants. Creation
/// time falls back to the modification time on filesystems that do not
/// record it.
pub fn entry_times(metadata: &Metadata) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let modified = metadata.modified().ok().map(system_time_to_utc);
    let created = metadata
        .created()
        .ok()
        .map(system_time_to_utc)
        .or(modified);
    (modified, created)
}

fn system_time_to_utc(t: std::time::SystemTime) -> DateTime<Utc> {
    match t.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => Utc
            .timestamp_opt(d.as_secs() as i64, d.subsec_nanos())
            .single()
            .unwrap_or_else(Utc::now),
        // Pre-epoch timestamps: clamp to the epoch.
        Err(_) => Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now),
    }
}

/// Restore recorded timestamps on an extracted entry. The modification time
/// is set everywhere; the creation time only where the platform exposes it.
pub fn set_entry_times(
    path: &Path,
    create_time: Option<DateTime<Utc>>,
    mod_time: Option<DateTime<Utc>>,
) -> std::io::Result<()> {
    let Some(mod_time) = mod_time else {
        return Ok(());
    };

    #[cfg(unix)]
    {
        let _ = create_time;
        set_file_mtime(path, mod_time.timestamp(), mod_time.timestamp_subsec_nanos())
    }

    #[cfg(windows)]
    {
        use std::fs::{FileTimes, OpenOptions};
        use std::os::windows::fs::{FileTimesExt, OpenOptionsExt};

        const FILE_WRITE_ATTRIBUTES: u32 = 0x0100;
        let file = OpenOptions::new()
            .access_mode(FILE_WRITE_ATTRIBUTES)
            .open(path)?;
        let mut times = FileTimes::new().set_modified(to_system_time(mod_time));
        if let Some(created) = create_time {
            times = times.set_created(to_system_time(created));
        }
        file.set_times(times)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (path, create_time);
        Ok(())
    }
}

#[cfg(windows)]
fn to_system_time(t: DateTime<Utc>) -> std::time::SystemTime {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    let secs = t.timestamp();
    let nanos = t.timestamp_subsec_nanos();
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nanos)
    } else {
        UNIX_EPOCH - Duration::new(secs.unsigned_abs(), 0) + Duration::new(0, nanos)
    }
}

#[cfg(unix)]
fn set_file_mtime(path: &Path, secs: i64, nanos: u32) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains null"))?;
    let times = [
        libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        libc::timespec {
            tv_sec: secs as _,
            tv_nsec: nanos as _,
        },
    ];
    if unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Mark a directory hidden. A no-op on Unix, where the dot prefix already
/// hides it.
pub fn set_hidden(path: &Path) -> std::io::Result<()> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{
            GetFileAttributesW, SetFileAttributesW, FILE_ATTRIBUTE_HIDDEN,
            INVALID_FILE_ATTRIBUTES,
        };

        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let attrs = unsafe { GetFileAttributesW(wide.as_ptr()) };
        if attrs == INVALID_FILE_ATTRIBUTES {
            return Err(std::io::Error::last_os_error());
        }
        if unsafe { SetFileAttributesW(wide.as_ptr(), attrs | FILE_ATTRIBUTE_HIDDEN) } == 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(windows))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn entry_times_reports_modification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"x").unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        let (modified, created) = entry_times(&meta);
        assert!(modified.is_some());
        // Creation time always resolves, by fallback if necessary.
        assert!(created.is_some());
    }

    #[test]
    fn set_entry_times_roundtrips_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"x").unwrap();

        let target = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        set_entry_times(&path, None, Some(target)).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        let mtime = meta.modified().unwrap();
        let since_epoch = mtime.duration_since(SystemTime::UNIX_EPOCH).unwrap();
        let diff = (since_epoch.as_secs() as i64 - 1_700_000_000).unsigned_abs();
        assert!(diff <= 1, "mtime off by {diff} seconds");
    }

    #[test]
    fn set_entry_times_without_mtime_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"x").unwrap();
        set_entry_times(&path, None, None).unwrap();
    }
}
