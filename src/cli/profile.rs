use anyhow::{Result, anyhow};
use serde_json::json;

use super::{CommandFlags, ensure_data_dir, parse_flags, require_owner};
use crate::core::bootstrap::DATABASE_FILE;
use crate::core::persistence::Database;
use crate::core::persistence::types::OwnerProfile;
use crate::core::terminal::{GuideSection, print_error, print_success};

pub async fn run_profile_command(args: &[String]) -> Result<i32> {
    let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
    let flags = parse_flags(args, 3)?;
    match sub_cmd {
        "set" => set_profile(&flags).await,
        "show" => show_profile(&flags).await,
        _ => {
            GuideSection::new("jobpilot profile")
                .command("set", "--owner ID [--name N] [--email E] [--phone P] [--resume FILE]")
                .command("show", "--owner ID")
                .print();
            Ok(if flags.help { 0 } else { 1 })
        }
    }
}

/// Apply the given flags on top of the stored profile.
pub(crate) async fn merge_profile(
    current: Option<OwnerProfile>,
    owner: &str,
    flags: &CommandFlags,
) -> Result<OwnerProfile> {
    let mut profile = current.unwrap_or_else(|| OwnerProfile {
        owner_id: owner.to_string(),
        ..OwnerProfile::default()
    });
    if let Some(name) = &flags.name {
        profile.display_name = Some(name.clone());
    }
    if let Some(email) = &flags.email {
        profile.email = Some(email.clone());
    }
    if let Some(phone) = &flags.phone {
        profile.phone = Some(phone.clone());
    }
    if let Some(path) = &flags.resume_file {
        let resume = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("reading {}: {}", path.display(), e))?;
        profile.resume = Some(resume);
    }
    Ok(profile)
}

async fn set_profile(flags: &CommandFlags) -> Result<i32> {
    let owner = require_owner(flags)?;
    let db = Database::open(ensure_data_dir()?.join(DATABASE_FILE)).await?;
    let profile = merge_profile(db.get_profile(&owner).await?, &owner, flags).await?;
    db.upsert_profile(&profile).await?;
    print_success(&format!("Profile for {} saved.", owner));
    Ok(0)
}

async fn show_profile(flags: &CommandFlags) -> Result<i32> {
    let owner = require_owner(flags)?;
    let db = Database::open(ensure_data_dir()?.join(DATABASE_FILE)).await?;
    let Some(profile) = db.get_profile(&owner).await? else {
        print_error(&format!("No profile stored for {}", owner));
        return Ok(1);
    };
    let applications = db.list_applications(&owner).await?;
    let out = json!({
        "profile": profile,
        "applications": applications.len(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(0)
}
