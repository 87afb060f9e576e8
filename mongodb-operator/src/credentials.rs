use rand::seq::IndexedRandom;
use rand::rngs::OsRng;
use rand::TryRngCore;
use serde::Deserialize;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

use crate::util::Error;

const PASSWORD_LENGTH: usize = 23;
const PASSWORD_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()";

/// A cryptographically strong random password, drawn from `rand`'s
/// OS-backed RNG. Never seeded from wall-clock time; never the
/// non-cryptographic convenience RNG.
pub fn random_password() -> String {
    let alphabet: Vec<char> = PASSWORD_ALPHABET.chars().collect();
    let mut rng = OsRng.unwrap_err();
    (0..PASSWORD_LENGTH)
        .map(|_| *alphabet.choose(&mut rng).expect("alphabet is non-empty"))
        .collect()
}

#[derive(Deserialize)]
struct CfsslOutput {
    cert: String,
    key: String,
    #[serde(default)]
    csr: String,
}

fn csr_json(cn: &str, org: Option<&str>, hosts: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "CN": cn,
        "key": { "algo": "rsa", "size": 2048 },
        "names": [{ "O": org.unwrap_or(cn) }],
        "hosts": hosts,
    })
}

fn run_cfssl(args: &[&str], stdin_contents: &str) -> Result<CfsslOutput, Error> {
    let mut child = Command::new("cfssl")
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;
    child
        .stdin
        .as_mut()
        .expect("stdin was piped")
        .write_all(stdin_contents.as_bytes())?;
    let output = child.wait_with_output()?;
    serde_json::from_slice(&output.stdout).map_err(|source| Error::CfsslOutput { source })
}

/// Issues a self-signed CA for the cluster's member certificates. Returns
/// `(cert_pem, key_pem, csr_pem)`.
pub fn generate_ca(name: &str, namespace: &str) -> Result<(String, String, String), Error> {
    let cn = format!("{name}.{namespace}.svc.cluster.local");
    let csr = csr_json(&cn, Some(&cn), &[]);
    let csr_file = NamedTempFile::new()?;
    serde_json::to_writer(&csr_file, &csr)?;
    let out = run_cfssl(
        &["genkey", "-initca", csr_file.path().to_str().unwrap_or_default()],
        "",
    )?;
    Ok((out.cert, out.key, out.csr))
}

/// Issues a client certificate signed by `ca_pem`/`ca_key_pem`. Returns
/// `(mongod_pem = cert ∥ key, csr_pem)`.
pub fn generate_client(
    ca_pem: &str,
    ca_key_pem: &str,
    name: &str,
) -> Result<(String, String), Error> {
    let cn = format!("{name}-client");
    let csr = csr_json(&cn, None, &[]);
    let csr_file = NamedTempFile::new()?;
    serde_json::to_writer(&csr_file, &csr)?;

    let mut ca_file = NamedTempFile::new()?;
    ca_file.write_all(ca_pem.as_bytes())?;
    let mut ca_key_file = NamedTempFile::new()?;
    ca_key_file.write_all(ca_key_pem.as_bytes())?;

    let ca_arg = format!("-ca={}", ca_file.path().to_str().unwrap_or_default());
    let ca_key_arg = format!("-ca-key={}", ca_key_file.path().to_str().unwrap_or_default());
    let out = run_cfssl(
        &[
            "gencert",
            &ca_arg,
            &ca_key_arg,
            "-config=ca-config.json",
            "-profile=client",
            csr_file.path().to_str().unwrap_or_default(),
        ],
        "",
    )?;
    let mongod_pem = format!("{}{}", out.cert, out.key);
    Ok((mongod_pem, out.csr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_password_has_the_expected_length_and_alphabet() {
        let password = random_password();
        assert_eq!(password.chars().count(), PASSWORD_LENGTH);
        assert!(password.chars().all(|c| PASSWORD_ALPHABET.contains(c)));
    }

    #[test]
    fn random_password_is_not_constant() {
        let a = random_password();
        let b = random_password();
        assert_ne!(a, b);
    }

    #[test]
    fn csr_json_uses_cn_as_default_org() {
        let csr = csr_json("t1.n1.svc.cluster.local", None, &[]);
        assert_eq!(csr["names"][0]["O"], "t1.n1.svc.cluster.local");
    }
}
