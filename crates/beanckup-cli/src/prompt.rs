use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// Print a prompt and read one trimmed line from stdin. A closed stdin is
/// an error, so interactive loops terminate instead of spinning.
pub fn read_line(prompt: &str) -> io::Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdin closed",
        ));
    }
    Ok(line.trim().to_string())
}

pub fn confirm(prompt: &str) -> bool {
    matches!(
        read_line(&format!("{prompt} (y/n): ")).as_deref(),
        Ok("y") | Ok("Y") | Ok("yes")
    )
}

/// Ask until the user names an existing directory. Surrounding quotes from
/// drag-and-drop are stripped.
pub fn ask_existing_dir(prompt: &str) -> io::Result<PathBuf> {
    loop {
        let input = read_line(&format!("{prompt}: "))?;
        let cleaned = input.trim_matches('"');
        if cleaned.is_empty() {
            continue;
        }
        let path = PathBuf::from(cleaned);
        if path.is_dir() {
            return Ok(path);
        }
        println!("Path '{cleaned}' does not exist or is not a directory, try again.");
    }
}

/// Ask for a path with a fallback; the directory does not have to exist yet.
pub fn ask_dir_with_default(prompt: &str, default: &str) -> io::Result<PathBuf> {
    let input = read_line(&format!("{prompt} (enter for '{default}'): "))?;
    let cleaned = input.trim_matches('"');
    if cleaned.is_empty() {
        Ok(PathBuf::from(default))
    } else {
        Ok(PathBuf::from(cleaned))
    }
}

/// Ask for a number, keeping `default` on empty or invalid input.
pub fn ask_u32(prompt: &str, default: u32) -> io::Result<u32> {
    let input = read_line(&format!("{prompt} (enter for {default}): "))?;
    Ok(input.parse().unwrap_or(default))
}

/// Compression level 0-9; out-of-range input falls back to `default`.
pub fn ask_compression_level(default: u8) -> io::Result<u8> {
    let input = read_line(&format!("Compression level 0-9 (enter for {default}): "))?;
    match input.parse::<u8>() {
        Ok(level) if level <= 9 => Ok(level),
        _ => Ok(default),
    }
}

/// Hidden password input; empty means no encryption.
pub fn ask_password(prompt: &str) -> io::Result<Option<String>> {
    let password = rpassword::prompt_password(format!("{prompt}: "))?;
    let password = password.trim().to_string();
    Ok(if password.is_empty() {
        None
    } else {
        Some(password)
    })
}

/// Pick an entry from a 1-based menu of `count` options. `None` when the
/// input is not a valid index.
pub fn ask_choice(prompt: &str, count: usize) -> io::Result<Option<usize>> {
    let input = read_line(&format!("{prompt} (1-{count}): "))?;
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Ok(Some(n - 1)),
        _ => Ok(None),
    }
}
