use collecta_db::{connect_with_config, migrations, ReferenceData};
use serde_json::json;

use crate::commands::{load_config, runtime, CommandResult};

/// Loads the reference catalog (states, management types, demo personas,
/// debts and rules). Re-running leaves existing debts and rules untouched.
pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let data = ReferenceData::standard();
    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        data.load_into_pool(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success_with_details(
            "seed",
            summary(&data),
            Some(json!({
                "states": data.states.len(),
                "management_types": data.management_types.len(),
                "personas": data.personas.len(),
                "debts": data.debts.len(),
                "rules": data.rules.len(),
            })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(data: &ReferenceData) -> String {
    format!(
        "reference data loaded: {} states, {} management types, {} debts, {} rules",
        data.states.len(),
        data.management_types.len(),
        data.debts.len(),
        data.rules.len()
    )
}

#[cfg(test)]
mod tests {
    use collecta_db::ReferenceData;

    use super::summary;

    #[test]
    fn summary_counts_the_standard_catalog() {
        assert_eq!(
            summary(&ReferenceData::standard()),
            "reference data loaded: 6 states, 5 management types, 4 debts, 5 rules"
        );
    }
}
