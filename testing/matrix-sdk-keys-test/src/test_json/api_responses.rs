//! Responses to client API calls.

use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};

/// `GET /_matrix/client/v3/devices`
pub static DEVICES: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "devices": [
            {
                "device_id": "BNYQQWUMXO",
                "display_name": "Client 1",
                "last_seen_ip": "-",
                "last_seen_ts": 1596117733037u64,
                "user_id": "@example:localhost"
            },
            {
                "device_id": "LEBKSEUSNR",
                "display_name": "Client 2",
                "last_seen_ip": "-",
                "last_seen_ts": 1599057006985u64,
                "user_id": "@example:localhost"
            }
        ]
    })
});

/// `POST /_matrix/client/v3/keys/upload`
pub static KEYS_UPLOAD: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "one_time_key_counts": {
        "curve25519": 10,
        "signed_curve25519": 20
      }
    })
});

/// `POST /_matrix/client/v3/keys/query`
///
/// One device for `@a:x` and two for `@b:x`.
pub static KEYS_QUERY: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "device_keys": {
        "@a:x": {
          "JLAFKJWSCS": {
              "algorithms": [
                  "m.olm.v1.curve25519-aes-sha2",
                  "m.megolm.v1.aes-sha2"
              ],
              "device_id": "JLAFKJWSCS",
              "user_id": "@a:x",
              "keys": {
                  "curve25519:JLAFKJWSCS": "wjLpTLRqbqBzLs63aYaEv2Boi6cFEbbM/sSRQ2oAKk4",
                  "ed25519:JLAFKJWSCS": "nE6W2fCblxDcOFmeEtCHNl8/l8bXcu7GKyAswA4r3mM"
              },
              "signatures": {
                  "@a:x": {
                      "ed25519:JLAFKJWSCS": "m53Wkbh2HXkc3vFApZvCrfXcX3AI51GsDHustMhKwlv3TuOJMj4wistcOTM8q2+e/Ro7rWFUb9ZfnNbwptSUBA"
                  }
              },
              "unsigned": {
                  "device_display_name": "Alice's mobile phone"
              }
          }
        },
        "@b:x": {
          "BOBDEVICE1": {
              "algorithms": ["m.olm.v1.curve25519-aes-sha2"],
              "device_id": "BOBDEVICE1",
              "user_id": "@b:x",
              "keys": {
                  "curve25519:BOBDEVICE1": "bsAF3cJxH7ZHBbJ4bGfT8y+rr8/1ZBmRS9bxd9s9+jk",
                  "ed25519:BOBDEVICE1": "qnKd6NiwSsM0cJfnZ5Zy0tFa3BwbBqPULkWEQrR+M1A"
              },
              "signatures": {}
          },
          "BOBDEVICE2": {
              "algorithms": ["m.olm.v1.curve25519-aes-sha2"],
              "device_id": "BOBDEVICE2",
              "user_id": "@b:x",
              "keys": {
                  "curve25519:BOBDEVICE2": "+ghtOTjsBZpR7ypzfHy1Fd5ExcsjmWPMWfmhu4qpmFk",
                  "ed25519:BOBDEVICE2": "X5wh4xiVSPPKYkz/2QBkPm5BHvOJQ8FrZFQGhaNA1R4"
              },
              "signatures": {}
          }
        }
      },
      "failures": {}
    })
});

/// `POST /_matrix/client/v3/keys/query` with an unreachable server and a
/// malformed device entry.
pub static KEYS_QUERY_WITH_FAILURES: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "device_keys": {
        "@a:x": {
          "JLAFKJWSCS": {
              "device_id": "JLAFKJWSCS",
              "user_id": "@a:x",
              "keys": {}
          },
          "BROKEN": "not an object"
        }
      },
      "failures": {
        "other.server": {
          "errcode": "M_UNKNOWN",
          "error": "Couldn't reach the server"
        }
      }
    })
});

/// `POST /_matrix/client/v3/keys/claim`
pub static KEYS_CLAIM: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "one_time_keys": {
        "@b:x": {
          "BOBDEVICE1": {
            "signed_curve25519:AAAAHg": {
              "key": "zKbLg+NrIjpnagy+pIY6uPL4ZwEG2v+8F9lmgsnlZzs",
              "signatures": {
                "@b:x": {
                  "ed25519:BOBDEVICE1": "FLWxXqGbwrb8SM3Y795eB6OA8bwBcoMZFXBqnTn58AYWZSqiD45tlBVcDa2L7RwdKXebW/VzDlnfVJ+9jok1Bw"
                }
              }
            }
          }
        }
      },
      "failures": {}
    })
});

/// `POST /_matrix/client/v3/keys/claim` without any key left on the server.
pub static KEYS_CLAIM_EMPTY: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "one_time_keys": {
        "@b:x": {}
      },
      "failures": {}
    })
});

/// `GET /_matrix/client/v3/keys/changes`
pub static KEY_CHANGES: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "changed": ["@a:x", "@b:x"],
      "left": ["@c:x"]
    })
});

/// A 401 response to a request needing user-interactive auth.
pub static UIAA_PASSWORD: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "flows": [
        { "stages": ["m.login.password"] }
      ],
      "params": {},
      "session": "xxxxxxyz"
    })
});

/// A rate-limited response.
pub static LIMIT_EXCEEDED: Lazy<JsonValue> = Lazy::new(|| {
    json!({
      "errcode": "M_LIMIT_EXCEEDED",
      "error": "Too many requests",
      "retry_after_ms": 20
    })
});
