use secrules::input::read_rule_file;
use secrules::output::{print_rule_group, print_rule_set, print_sync_plan};
use secrules::{build_group, check_for_duplicate_rules, plan_reduced_sync, reduce_rules};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    // Do as little as possible in main.rs as it can't contain any tests
    log4rs::init_file("log4rs.yml", Default::default())?;
    dotenv::dotenv().ok();
    log::info!("#Start main()");

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => std::env::var("SECRULES_FILE")
            .map_err(|_| "usage: secrules <rule file> [current rule file] (or set SECRULES_FILE)")?,
    };

    let rules = read_rule_file(&path)?;
    check_for_duplicate_rules(&rules)?;

    let (ingress, egress) = reduce_rules(&rules);
    print_rule_set("ingress allow list", &ingress);
    print_rule_set("egress allow list", &egress);
    print_rule_group("security group", &build_group(&rules));

    // Optional rules currently applied to the group, diffed against the reduced set.
    let current = std::env::args()
        .nth(2)
        .or_else(|| std::env::var("SECRULES_CURRENT_FILE").ok());
    if let Some(current) = current {
        let current = read_rule_file(&current)?;
        print_sync_plan("sync plan", &plan_reduced_sync(&current, &rules));
    }

    Ok(())
}
