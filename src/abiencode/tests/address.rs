use super::types::{Address, Hash};
use super::*;

const TOKEN: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

#[test]
fn plain() {
    let addr: Address = TOKEN.parse().unwrap();

    let expected = "
000000000000000000000000a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48
    ";

    serialize_and_compare(&addr, expected)
}

#[test]
fn ledger_head() {
    // `(uint64 chainId, address token, uint8 decimals)`, the leading members
    // of a packed ledger.
    #[derive(Serialize, Debug)]
    struct LedgerHead {
        chain_id: u64,
        token: Address,
        decimals: u8,
    }

    let d = LedgerHead {
        chain_id: 1,
        token: TOKEN.parse().unwrap(),
        decimals: 6,
    };

    // Static => no offset in front.
    let expected = "
0000000000000000000000000000000000000000000000000000000000000001 // chain_id
000000000000000000000000a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48 // token
0000000000000000000000000000000000000000000000000000000000000006 // decimals
    ";

    serialize_and_compare(&d, expected)
}

#[test]
fn as_account_reference() {
    // A wallet referenced as `bytes32` encodes exactly like the address.
    let addr: Address = TOKEN.parse().unwrap();
    let account = Hash::from(addr);
    assert_eq!(to_vec(&account).unwrap(), to_vec(&addr).unwrap());
    assert_eq!(
        account.to_string(),
        "0x000000000000000000000000a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
    );
}

#[test]
fn display_and_json() {
    let addr: Address = TOKEN.parse().unwrap();
    assert_eq!(addr.to_string(), TOKEN.to_lowercase());

    let json = serde_json::to_string(&addr).unwrap();
    assert_eq!(json, format!("\"{}\"", TOKEN.to_lowercase()));
    assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), addr);

    assert!("0x1234".parse::<Address>().is_err());
    assert!("0xzzb86991c6218b36c1d19D4a2e9Eb0cE3606eB48".parse::<Address>().is_err());
}
