//! Toy approval program storing a single `current_name`

use crate::contract::AppEnv;
use crate::ensure;
use crate::ledger::{OnComplete, StateSchema, StateValue};
use crate::{Error, Result};

pub const CURRENT_NAME_KEY: &[u8] = b"current_name";

pub const CHANGE_METHOD: &[u8] = b"change";

pub fn global_schema() -> StateSchema {
    StateSchema::new(0, 1)
}

pub fn approve(env: &mut dyn AppEnv) -> Result<()> {
    let call = env.call().clone();
    if call.app_id.is_create() {
        if let Some(initial) = call.args.first() {
            env.global_put(CURRENT_NAME_KEY, StateValue::Bytes(initial.clone()))?;
        }
        return Ok(());
    }

    match call.on_complete {
        OnComplete::NoOp => {
            ensure!(
                call.method() == Some(CHANGE_METHOD),
                "expected a \"change\" call"
            );
            ensure!(
                call.args.len() == 2,
                "change expects [method, name], got {} args",
                call.args.len()
            );
            env.global_put(CURRENT_NAME_KEY, StateValue::Bytes(call.args[1].clone()))
        }
        OnComplete::DeleteApplication => {
            ensure!(
                env.sender() == env.creator(),
                "only the creator may delete the application"
            );
            Ok(())
        }
        other => Err(Error::rejected(format!("{:?} is not supported", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::testing::FakeEnv;
    use crate::ledger::Address;

    #[test]
    fn test_create_stores_initial_name() {
        let mut env = FakeEnv::new(Address([1; 32]), OnComplete::NoOp, vec![b"Bob".to_vec()])
            .creating();
        approve(&mut env).unwrap();
        assert_eq!(env.globals.bytes(CURRENT_NAME_KEY), b"Bob");
    }

    #[test]
    fn test_change_name() {
        let args = vec![CHANGE_METHOD.to_vec(), b"Alice".to_vec()];
        let mut env = FakeEnv::new(Address([1; 32]), OnComplete::NoOp, args);
        approve(&mut env).unwrap();
        assert_eq!(env.globals.bytes(CURRENT_NAME_KEY), b"Alice");
    }

    #[test]
    fn test_rejects_other_calls() {
        let mut env = FakeEnv::new(Address([1; 32]), OnComplete::NoOp, vec![b"rename".to_vec()]);
        assert!(approve(&mut env).is_err());

        let mut env = FakeEnv::new(Address([1; 32]), OnComplete::OptIn, vec![]);
        assert!(approve(&mut env).is_err());

        let mut env = FakeEnv::new(Address([1; 32]), OnComplete::DeleteApplication, vec![]);
        assert!(approve(&mut env).is_err());
    }
}
