use mc6_storage::{BackendContract, LogPosition, CONFIG_METADATA_KEY};

use crate::{command::Command, errors::EngineError, registry::FunctionRegistry};

/// Executes a single command against `backend` at `position`, returning
/// its reply. Shared by the apply path (`apply_op`) and the read path
/// (`read`, delayed-read drain) — the only difference between the two is
/// whether the caller subsequently advances `last_applied`.
pub fn dispatch<B: BackendContract>(
    backend: &mut B,
    registry: &FunctionRegistry<B>,
    command: &Command,
    position: LogPosition,
) -> Result<Vec<u8>, EngineError> {
    match command {
        Command::Noop => Ok(backend.apply(&Vec::new(), position)?),
        Command::Config(value) => {
            backend.write_metadata(&CONFIG_METADATA_KEY.to_string(), position, &value.to_vec())?;
            Ok(value.to_vec())
        }
        Command::Execute {
            table,
            module,
            function,
            args,
        } => registry.invoke(module, function, backend, position, table, args),
        Command::UserCommand(opaque) => Ok(backend.apply(&opaque.to_vec(), position)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mc6_storage::SledBackend;

    fn backend() -> (tempfile::TempDir, SledBackend) {
        let tmp = tempfile::tempdir().unwrap();
        let backend = SledBackend::open("n", "t", 0, tmp.path()).unwrap();
        (tmp, backend)
    }

    #[test]
    fn noop_advances_backend_position() {
        let (_tmp, mut backend) = backend();
        let registry = FunctionRegistry::new();
        dispatch(&mut backend, &registry, &Command::Noop, LogPosition::new(1, 1)).unwrap();
        assert_eq!(backend.position(), LogPosition::new(1, 1));
    }

    #[test]
    fn config_writes_metadata_under_the_reserved_key() {
        let (_tmp, mut backend) = backend();
        let registry = FunctionRegistry::new();
        let position = LogPosition::new(2, 1);
        dispatch(
            &mut backend,
            &registry,
            &Command::Config(Bytes::from_static(b"cluster-config")),
            position,
        )
        .unwrap();

        let entry = backend
            .read_metadata(&CONFIG_METADATA_KEY.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(entry.version, position);
        assert_eq!(entry.value, b"cluster-config".to_vec());
    }

    #[test]
    fn user_command_is_forwarded_verbatim() {
        let (_tmp, mut backend) = backend();
        let registry = FunctionRegistry::new();
        let reply = dispatch(
            &mut backend,
            &registry,
            &Command::UserCommand(Bytes::from_static(b"payload")),
            LogPosition::new(1, 1),
        )
        .unwrap();
        assert_eq!(reply, b"payload".to_vec());
    }

    #[test]
    fn execute_with_unknown_function_errors_without_mutating_backend() {
        let (_tmp, mut backend) = backend();
        let registry = FunctionRegistry::new();
        let before = backend.position();
        let err = dispatch(
            &mut backend,
            &registry,
            &Command::Execute {
                table: "t".to_string(),
                module: "mod".to_string(),
                function: "fn".to_string(),
                args: Bytes::new(),
            },
            LogPosition::new(1, 1),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnknownFunction { .. }));
        assert_eq!(backend.position(), before);
    }
}
