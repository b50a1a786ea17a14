use beanckup_core::error::Result;
use beanckup_core::restore::Restorer;

use crate::prompt;

/// The restore flow: discover packages, pick a session, pre-load manifests,
/// confirm, and materialize.
pub fn run() -> Result<()> {
    println!("\n=== File restore ===");
    let delivery_dir = prompt::ask_existing_dir("Delivery directory holding the packages")?;

    let restorer = Restorer::discover(&delivery_dir)?;
    if restorer.sessions().is_empty() {
        println!("No packages found in '{}'.", delivery_dir.display());
        return Ok(());
    }

    println!(
        "\nFound {} session(s) across {} package(s):",
        restorer.sessions().len(),
        restorer.package_count()
    );
    for (i, session_id) in restorer.sessions().iter().enumerate() {
        println!("  [{}] session S{session_id:02}", i + 1);
    }
    let Some(choice) = prompt::ask_choice("Pick a session to restore", restorer.sessions().len())?
    else {
        println!("Invalid choice, returning to the menu.");
        return Ok(());
    };
    let session_id = restorer.sessions()[choice];

    let password = prompt::ask_password("Package password (empty if unencrypted)")?;
    let session = restorer.load_session(session_id, password.as_deref())?;

    let file_count = session
        .target_manifests
        .iter()
        .map(|m| m.files.len())
        .sum::<usize>();
    println!(
        "\nRestoring '{}' session S{:02} ({}, {} recorded file entries)",
        session.workspace_name,
        session.session_id,
        session.timestamp.format("%Y-%m-%d %H:%M:%S"),
        file_count
    );

    let dest = prompt::ask_dir_with_default("Restore destination", "./restore")?;
    if !prompt::confirm(&format!("Restore into '{}'?", dest.display())) {
        println!("Restore cancelled.");
        return Ok(());
    }

    let root = restorer.restore(&session, &dest, password.as_deref(), &mut |p| {
        println!("Unpacking {} file(s) from {}...", p.files, p.package);
    })?;

    println!("\n✓ Restore finished: {}", root.display());
    Ok(())
}
