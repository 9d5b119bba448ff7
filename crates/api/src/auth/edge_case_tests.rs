// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Authentication
//!
//! Tests boundary conditions in:
//! - JWT issue/verify (AUTH-J01 to AUTH-J06)
//! - Password hashing and strength (AUTH-P01 to AUTH-P06)

#[cfg(test)]
mod jwt_tests {
    use crate::auth::jwt::{Claims, JwtManager, TokenType};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use leadforge_shared::Role;
    use uuid::Uuid;

    const SECRET: &str = "unit-test-secret-key-0123456789abcdef";

    fn manager() -> JwtManager {
        JwtManager::new(SECRET, 1, 30)
    }

    // =========================================================================
    // AUTH-J01: Freshly issued access token verifies
    // =========================================================================
    #[test]
    fn test_access_token_roundtrip() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let pair = manager.generate_pair(user_id, Role::User).unwrap();

        let claims = manager
            .verify(&pair.access_token, TokenType::Access)
            .unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.jti, pair.access_jti);
        assert_eq!(claims.role, Role::User);
    }

    // =========================================================================
    // AUTH-J02: Refresh token rejected where an access token is expected
    // =========================================================================
    #[test]
    fn test_token_type_enforced() {
        let manager = manager();
        let pair = manager.generate_pair(Uuid::new_v4(), Role::User).unwrap();

        assert!(manager
            .verify(&pair.refresh_token, TokenType::Access)
            .is_err());
        assert!(manager
            .verify(&pair.access_token, TokenType::Refresh)
            .is_err());
    }

    // =========================================================================
    // AUTH-J03: Token signed with a different secret is rejected
    // =========================================================================
    #[test]
    fn test_wrong_secret_rejected() {
        let pair = JwtManager::new("another-secret-key-0123456789abcdef", 1, 30)
            .generate_pair(Uuid::new_v4(), Role::User)
            .unwrap();

        assert!(manager()
            .verify(&pair.access_token, TokenType::Access)
            .is_err());
    }

    // =========================================================================
    // AUTH-J04: Tampered payload is rejected
    // =========================================================================
    #[test]
    fn test_tampered_token_rejected() {
        let manager = manager();
        let pair = manager.generate_pair(Uuid::new_v4(), Role::User).unwrap();

        let mut parts: Vec<String> = pair
            .access_token
            .split('.')
            .map(|s| s.to_string())
            .collect();
        // Flip a character in the payload segment.
        parts[1] = format!("x{}", &parts[1][1..]);
        let tampered = parts.join(".");

        assert!(manager.verify(&tampered, TokenType::Access).is_err());
    }

    // =========================================================================
    // AUTH-J05: Expired token is rejected
    // =========================================================================
    #[test]
    fn test_expired_token_rejected() {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        // Well past the default validation leeway.
        let claims = Claims {
            sub: Uuid::new_v4(),
            role: Role::User,
            jti: Uuid::new_v4().to_string(),
            token_type: "access".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(manager().verify(&token, TokenType::Access).is_err());
    }

    // =========================================================================
    // AUTH-J06: Access and refresh JTIs differ within one pair
    // =========================================================================
    #[test]
    fn test_jtis_are_distinct() {
        let pair = manager().generate_pair(Uuid::new_v4(), Role::Admin).unwrap();
        assert_ne!(pair.access_jti, pair.refresh_jti);
        assert!(pair.refresh_expires_at > pair.access_expires_at);
    }
}

#[cfg(test)]
mod password_tests {
    use crate::auth::password::{
        generate_impossible_hash, hash_password, validate_password_strength, verify_password,
    };

    // =========================================================================
    // AUTH-P01: Hash/verify roundtrip
    // =========================================================================
    #[test]
    fn test_hash_verify_roundtrip() {
        let hash = hash_password("correct horse 1").unwrap();
        assert!(verify_password("correct horse 1", &hash).unwrap());
        assert!(!verify_password("wrong horse 1", &hash).unwrap());
    }

    // =========================================================================
    // AUTH-P02: Same password hashes differently (salted)
    // =========================================================================
    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("repeat-me-99").unwrap();
        let b = hash_password("repeat-me-99").unwrap();
        assert_ne!(a, b);
    }

    // =========================================================================
    // AUTH-P03: Impossible hash never verifies
    // =========================================================================
    #[test]
    fn test_impossible_hash_rejects_everything() {
        let hash = generate_impossible_hash().unwrap();
        for guess in ["", "password1", "admin123", "a"] {
            assert!(!verify_password(guess, &hash).unwrap());
        }
    }

    // =========================================================================
    // AUTH-P04: Length boundaries
    // =========================================================================
    #[test]
    fn test_length_boundaries() {
        assert!(validate_password_strength("abc1234").is_err(), "7 chars");
        assert!(validate_password_strength("abcd1234").is_ok(), "8 chars");
        let long = format!("a1{}", "x".repeat(127));
        assert!(validate_password_strength(&long).is_err(), "129 chars");
    }

    // =========================================================================
    // AUTH-P05: Composition requirements
    // =========================================================================
    #[test]
    fn test_composition_requirements() {
        assert!(validate_password_strength("12345678").is_err(), "no letter");
        assert!(validate_password_strength("abcdefgh").is_err(), "no digit");
        assert!(validate_password_strength("abcdefg1").is_ok());
    }

    // =========================================================================
    // AUTH-P06: Malformed stored hash is an error, not a bypass
    // =========================================================================
    #[test]
    fn test_malformed_hash_errors() {
        assert!(verify_password("anything1", "not-a-phc-string").is_err());
    }
}
