use comradarr_dev::config::{
    generate_db_name, generate_password, generate_secret_key, validate_db_name,
    MAX_DB_NAME_LENGTH,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn identifiers_are_accepted(name in "[A-Za-z_][A-Za-z0-9_]{0,62}") {
        prop_assert!(validate_db_name(&name).is_ok());
    }

    #[test]
    fn leading_digit_is_rejected(name in "[0-9][A-Za-z0-9_]{0,20}") {
        prop_assert!(validate_db_name(&name).is_err());
    }

    #[test]
    fn punctuation_is_rejected(
        head in "[a-z]{1,8}",
        bad in "[-;'\" .$()*]",
        tail in "[a-z]{0,8}",
    ) {
        let name = format!("{}{}{}", head, bad, tail);
        prop_assert!(validate_db_name(&name).is_err());
    }

    #[test]
    fn overlong_names_are_rejected(extra in 1usize..20) {
        let name = "a".repeat(MAX_DB_NAME_LENGTH + extra);
        prop_assert!(validate_db_name(&name).is_err());
    }

    #[test]
    fn generated_names_validate(prefix in "[a-z][a-z_]{0,20}") {
        let name = generate_db_name(&prefix);
        prop_assert!(validate_db_name(&name).is_ok());
        prop_assert_eq!(name.len(), prefix.len() + 9);
    }
}

#[test]
fn empty_name_is_rejected() {
    assert!(validate_db_name("").is_err());
}

#[test]
fn secrets_have_the_expected_shape() {
    let key = generate_secret_key();
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    let password = generate_password();
    assert_eq!(password.len(), 32);
    assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(password, generate_password());
}
