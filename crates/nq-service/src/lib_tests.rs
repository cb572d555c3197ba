use super::*;

#[test]
fn test_exit_codes() {
    let cases = [
        (
            ServiceError::Configuration(ConfigError::Invalid {
                field: "server.port".to_string(),
                message: "must not be 0".to_string(),
            }),
            3,
        ),
        (
            ServiceError::Database(StoreError::Unavailable {
                message: "refused".to_string(),
            }),
            4,
        ),
        (
            ServiceError::Broker(BrokerError::EndpointsExhausted { attempts: 6 }),
            5,
        ),
        (
            ServiceError::Secret(SecretError::NotFound {
                name: "NQ_ENCRYPTION_KEY".to_string(),
            }),
            6,
        ),
        (
            ServiceError::Encryption(EncryptionError::InvalidKey {
                message: "16 bytes".to_string(),
            }),
            6,
        ),
        (
            ServiceError::BindFailed {
                address: "0.0.0.0:8080".to_string(),
                message: "in use".to_string(),
            },
            2,
        ),
    ];

    for (error, code) in cases {
        assert_eq!(error.exit_code(), code, "{}", error);
    }
}

#[test]
fn test_store_errors_convert() {
    let error: ServiceError = StoreError::Database {
        message: "relation missing".to_string(),
    }
    .into();

    assert!(matches!(error, ServiceError::Database(_)));
    assert!(error.to_string().contains("relation missing"));
}
