//! Scopes demanded by the data contracts an action touches

use action_kernel_registry::{AccessType, DataClassification, DataContract, Sensitivity};

/// Scopes one linked data contract requires for the given access
pub fn required_scopes(contract: &DataContract, access: AccessType) -> Vec<String> {
    let mut scopes = Vec::new();

    match contract.classification {
        DataClassification::Financial | DataClassification::Regulatory => {
            let class = contract.classification.as_str();
            if access.reads() {
                scopes.push(format!("data:{}:read", class));
            }
            if access.writes() {
                scopes.push(format!("data:{}:write", class));
            }
        }
        DataClassification::Operational => {
            if access.writes() {
                scopes.push("data:operational:write".to_string());
            }
        }
        DataClassification::Public | DataClassification::Internal => {}
    }

    if matches!(contract.sensitivity, Sensitivity::Confidential | Sensitivity::Restricted) {
        scopes.push("data:sensitive:access".to_string());
    }
    if contract.sensitivity == Sensitivity::Restricted {
        scopes.push("data:restricted:access".to_string());
    }

    scopes
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_kernel_registry::GovernanceTier;

    fn contract(classification: DataClassification, sensitivity: Sensitivity) -> DataContract {
        DataContract::new("dc", classification, sensitivity, GovernanceTier::Tier3)
    }

    #[test]
    fn test_financial_scopes_follow_access() {
        let dc = contract(DataClassification::Financial, Sensitivity::Internal);
        assert_eq!(required_scopes(&dc, AccessType::Write), vec!["data:financial:write"]);
        assert_eq!(required_scopes(&dc, AccessType::Read), vec!["data:financial:read"]);
        assert_eq!(
            required_scopes(&dc, AccessType::ReadWrite),
            vec!["data:financial:read", "data:financial:write"]
        );
    }

    #[test]
    fn test_operational_only_guards_writes() {
        let dc = contract(DataClassification::Operational, Sensitivity::Public);
        assert!(required_scopes(&dc, AccessType::Read).is_empty());
        assert_eq!(required_scopes(&dc, AccessType::ReadWrite), vec!["data:operational:write"]);
    }

    #[test]
    fn test_sensitivity_scopes() {
        let dc = contract(DataClassification::Internal, Sensitivity::Confidential);
        assert_eq!(required_scopes(&dc, AccessType::Read), vec!["data:sensitive:access"]);

        let dc = contract(DataClassification::Regulatory, Sensitivity::Restricted);
        assert_eq!(
            required_scopes(&dc, AccessType::Read),
            vec!["data:regulatory:read", "data:sensitive:access", "data:restricted:access"]
        );
    }

    #[test]
    fn test_public_data_needs_nothing() {
        let dc = contract(DataClassification::Public, Sensitivity::Public);
        assert!(required_scopes(&dc, AccessType::ReadWrite).is_empty());
    }
}
