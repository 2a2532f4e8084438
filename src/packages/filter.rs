//! Package selection pipeline for schedule runs.
//!
//! Predicates are applied cheapest-first: tag and whitelist membership,
//! then blocklist, then the main-category bitset, and only then the
//! special sub-filters (the "old backups" check touches backup dates and
//! is the most expensive). The result is sorted by display label.

use super::{
    AppExtras, Package, MAIN_FILTER_SPECIAL, MAIN_FILTER_SYSTEM, MAIN_FILTER_USER,
};
use crate::schedule::{
    EnabledFilter, InstalledFilter, LatestFilter, LaunchableFilter, Schedule, SpecialFilter,
    UpdatedFilter,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Select and order the packages a schedule run should process.
///
/// Given identical inputs the result is identical on repeated calls.
/// An empty result is not an error at this layer.
pub fn filter_packages(
    packages: &[Package],
    extras: &HashMap<String, AppExtras>,
    schedule: &Schedule,
    global_blocklist: &HashSet<String>,
    old_backup_days: i64,
    now: DateTime<Utc>,
) -> Vec<Package> {
    let block_list: HashSet<&str> = global_blocklist
        .iter()
        .map(String::as_str)
        .chain(schedule.block_list.iter().map(String::as_str))
        .collect();

    let mut selected: Vec<Package> = packages
        .iter()
        .filter(|p| {
            schedule.tags_list.is_empty()
                || extras
                    .get(&p.package_name)
                    .map(|e| {
                        e.custom_tags
                            .iter()
                            .any(|tag| schedule.tags_list.contains(tag))
                    })
                    .unwrap_or(false)
        })
        .filter(|p| {
            schedule.custom_list.is_empty() || schedule.custom_list.contains(&p.package_name)
        })
        .filter(|p| !block_list.contains(p.package_name.as_str()))
        .filter(|p| matches_main_filter(p, schedule.main_filter))
        .filter(|p| matches_special_filter(p, &schedule.special_filter, old_backup_days, now))
        .cloned()
        .collect();

    selected.sort_by(|a, b| {
        a.package_label
            .to_lowercase()
            .cmp(&b.package_label.to_lowercase())
    });
    selected
}

/// Main-category predicate: an OR across the independently enabled bits.
/// A package matching none of its applicable bits is dropped.
fn matches_main_filter(package: &Package, main_filter: u32) -> bool {
    (main_filter & MAIN_FILTER_SYSTEM == MAIN_FILTER_SYSTEM
        && package.is_system
        && !package.is_special)
        || (main_filter & MAIN_FILTER_USER == MAIN_FILTER_USER && !package.is_system)
        || (main_filter & MAIN_FILTER_SPECIAL == MAIN_FILTER_SPECIAL && package.is_special)
}

/// Special sub-filters: an AND-combination of independent predicates.
fn matches_special_filter(
    package: &Package,
    filter: &SpecialFilter,
    old_backup_days: i64,
    now: DateTime<Utc>,
) -> bool {
    let installed = match filter.installed {
        InstalledFilter::All => true,
        InstalledFilter::Installed => package.is_installed,
        InstalledFilter::NotInstalled => !package.is_installed,
    };
    let launchable = match filter.launchable {
        LaunchableFilter::All => true,
        LaunchableFilter::Launchable => package.is_launchable,
        LaunchableFilter::NotLaunchable => !package.is_launchable,
    };
    let updated = match filter.updated {
        UpdatedFilter::All => true,
        UpdatedFilter::Updated => package.is_updated,
        UpdatedFilter::New => package.is_new,
        UpdatedFilter::NotUpdated => !package.is_updated,
    };
    let enabled = match filter.enabled {
        EnabledFilter::All => true,
        EnabledFilter::Enabled => !package.is_disabled,
        EnabledFilter::Disabled => package.is_disabled,
    };
    // A package with no backups counts as "new", never as "old".
    let latest = match filter.latest {
        LatestFilter::All => true,
        LatestFilter::Old => match package.latest_backup {
            Some(backup_date) => (now - backup_date).num_days() >= old_backup_days,
            None => false,
        },
        LatestFilter::New => match package.latest_backup {
            Some(backup_date) => (now - backup_date).num_days() < old_backup_days,
            None => true,
        },
    };
    installed && launchable && updated && enabled && latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn package(name: &str, label: &str) -> Package {
        Package {
            package_name: name.to_string(),
            package_label: label.to_string(),
            is_system: false,
            is_special: false,
            is_installed: true,
            is_disabled: false,
            is_updated: false,
            is_new: false,
            is_launchable: true,
            latest_backup: None,
        }
    }

    fn user_schedule() -> Schedule {
        Schedule {
            main_filter: MAIN_FILTER_USER,
            ..Schedule::new("test")
        }
    }

    fn names(packages: &[Package]) -> Vec<&str> {
        packages.iter().map(|p| p.package_name.as_str()).collect()
    }

    #[test]
    fn test_user_filter_drops_system_and_special() {
        let mut system = package("com.android.settings", "Settings");
        system.is_system = true;
        let mut special = package("special.data", "Special Data");
        special.is_special = true;
        let packages = vec![package("org.example.a", "Alpha"), system, special];

        let selected = filter_packages(
            &packages,
            &HashMap::new(),
            &user_schedule(),
            &HashSet::new(),
            30,
            Utc::now(),
        );

        assert_eq!(names(&selected), vec!["org.example.a"]);
    }

    #[test]
    fn test_main_filter_bits_or_combined() {
        let mut system = package("sys.pkg", "System Pkg");
        system.is_system = true;
        let mut special = package("spec.pkg", "Special Pkg");
        special.is_special = true;
        special.is_system = true;
        let packages = vec![package("user.pkg", "User Pkg"), system, special];

        let mut schedule = user_schedule();
        schedule.main_filter = MAIN_FILTER_USER | MAIN_FILTER_SPECIAL;

        let selected = filter_packages(
            &packages,
            &HashMap::new(),
            &schedule,
            &HashSet::new(),
            30,
            Utc::now(),
        );

        assert_eq!(names(&selected), vec!["spec.pkg", "user.pkg"]);
    }

    #[test]
    fn test_blocklist_union_of_global_and_schedule() {
        let packages = vec![
            package("a.pkg", "A"),
            package("b.pkg", "B"),
            package("c.pkg", "C"),
        ];
        let mut schedule = user_schedule();
        schedule.block_list = vec!["b.pkg".to_string()];
        let global: HashSet<String> = ["a.pkg".to_string()].into_iter().collect();

        let selected =
            filter_packages(&packages, &HashMap::new(), &schedule, &global, 30, Utc::now());

        assert_eq!(names(&selected), vec!["c.pkg"]);
    }

    #[test]
    fn test_whitelist_intersection() {
        let packages = vec![package("a.pkg", "A"), package("b.pkg", "B")];
        let mut schedule = user_schedule();
        schedule.custom_list = vec!["b.pkg".to_string()];

        let selected = filter_packages(
            &packages,
            &HashMap::new(),
            &schedule,
            &HashSet::new(),
            30,
            Utc::now(),
        );

        assert_eq!(names(&selected), vec!["b.pkg"]);
    }

    #[test]
    fn test_tags_filter_requires_matching_extra() {
        let packages = vec![package("tagged.pkg", "Tagged"), package("plain.pkg", "Plain")];
        let mut extras = HashMap::new();
        extras.insert(
            "tagged.pkg".to_string(),
            AppExtras {
                package_name: "tagged.pkg".to_string(),
                custom_tags: vec!["work".to_string()],
                note: None,
            },
        );
        let mut schedule = user_schedule();
        schedule.tags_list = vec!["work".to_string()];

        let selected =
            filter_packages(&packages, &extras, &schedule, &HashSet::new(), 30, Utc::now());

        assert_eq!(names(&selected), vec!["tagged.pkg"]);
    }

    #[test]
    fn test_latest_filter_no_backups_counts_as_new() {
        let now = Utc::now();
        let never_backed_up = package("never.pkg", "Never");
        let mut old = package("old.pkg", "Old");
        old.latest_backup = Some(now - Duration::days(90));
        let mut fresh = package("fresh.pkg", "Fresh");
        fresh.latest_backup = Some(now - Duration::days(1));
        let packages = vec![never_backed_up, old, fresh];

        let mut schedule = user_schedule();
        schedule.special_filter.latest = LatestFilter::New;
        let selected =
            filter_packages(&packages, &HashMap::new(), &schedule, &HashSet::new(), 30, now);
        assert_eq!(names(&selected), vec!["fresh.pkg", "never.pkg"]);

        schedule.special_filter.latest = LatestFilter::Old;
        let selected =
            filter_packages(&packages, &HashMap::new(), &schedule, &HashSet::new(), 30, now);
        assert_eq!(names(&selected), vec!["old.pkg"]);
    }

    #[test]
    fn test_latest_filter_zero_threshold_excludes_backupless_from_old() {
        let packages = vec![package("never.pkg", "Never")];
        let mut schedule = user_schedule();
        schedule.special_filter.latest = LatestFilter::Old;

        let selected = filter_packages(
            &packages,
            &HashMap::new(),
            &schedule,
            &HashSet::new(),
            0,
            Utc::now(),
        );

        assert!(selected.is_empty());
    }

    #[test]
    fn test_special_filters_and_combined() {
        let mut disabled = package("disabled.pkg", "Disabled");
        disabled.is_disabled = true;
        let mut not_launchable = package("background.pkg", "Background");
        not_launchable.is_launchable = false;
        let packages = vec![package("ok.pkg", "Ok"), disabled, not_launchable];

        let mut schedule = user_schedule();
        schedule.special_filter.enabled = EnabledFilter::Enabled;
        schedule.special_filter.launchable = LaunchableFilter::Launchable;

        let selected = filter_packages(
            &packages,
            &HashMap::new(),
            &schedule,
            &HashSet::new(),
            30,
            Utc::now(),
        );

        assert_eq!(names(&selected), vec!["ok.pkg"]);
    }

    #[test]
    fn test_sorted_by_label_case_insensitive() {
        let packages = vec![
            package("z.pkg", "zebra"),
            package("a.pkg", "Apple"),
            package("m.pkg", "mango"),
        ];

        let selected = filter_packages(
            &packages,
            &HashMap::new(),
            &user_schedule(),
            &HashSet::new(),
            30,
            Utc::now(),
        );

        let labels: Vec<&str> = selected.iter().map(|p| p.package_label.as_str()).collect();
        assert_eq!(labels, vec!["Apple", "mango", "zebra"]);
    }

    #[test]
    fn test_deterministic_on_repeated_calls() {
        let packages = vec![
            package("b.pkg", "Beta"),
            package("a.pkg", "Alpha"),
            package("c.pkg", "Gamma"),
        ];
        let schedule = user_schedule();
        let now = Utc::now();

        let first = filter_packages(
            &packages,
            &HashMap::new(),
            &schedule,
            &HashSet::new(),
            30,
            now,
        );
        let second = filter_packages(
            &packages,
            &HashMap::new(),
            &schedule,
            &HashSet::new(),
            30,
            now,
        );

        assert_eq!(names(&first), names(&second));
    }
}
