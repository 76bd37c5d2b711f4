use super::types::Address;
use super::*;

#[derive(Serialize, Debug)]
struct Participant {
    wallet: Address,
    weight: u8,
}

#[test]
fn string_and_static_struct_array() {
    /*
    ```solidity
        struct Participant {
            address wallet;
            uint8 weight;
        }
        struct Definition {
            string application;
            Participant[] participants;
            uint8 quorum;
            uint64 nonce;
        }
    ```
    */
    #[derive(Serialize, Debug)]
    struct Definition {
        application: String,
        participants: Vec<Participant>,
        quorum: u8,
        nonce: u64,
    }

    let d = Definition {
        application: "chess".into(),
        participants: vec![
            Participant {
                wallet: Address([0x11; 20]),
                weight: 1,
            },
            Participant {
                wallet: Address([0x22; 20]),
                weight: 2,
            },
        ],
        quorum: 2,
        nonce: 5,
    };

    let expected = "
0000000000000000000000000000000000000000000000000000000000000020 // d offset
    0000000000000000000000000000000000000000000000000000000000000080 // d.application offset
    00000000000000000000000000000000000000000000000000000000000000c0 // d.participants offset
    0000000000000000000000000000000000000000000000000000000000000002 // d.quorum
    0000000000000000000000000000000000000000000000000000000000000005 // d.nonce
        0000000000000000000000000000000000000000000000000000000000000005 // d.application length
        6368657373000000000000000000000000000000000000000000000000000000 // d.application

        0000000000000000000000000000000000000000000000000000000000000002 // d.participants length
        0000000000000000000000001111111111111111111111111111111111111111 // d.participants[0].wallet
        0000000000000000000000000000000000000000000000000000000000000001 // d.participants[0].weight
        0000000000000000000000002222222222222222222222222222222222222222 // d.participants[1].wallet
        0000000000000000000000000000000000000000000000000000000000000002 // d.participants[1].weight
    ";
    serialize_and_compare(&d, expected);
}

#[test]
fn dynamic_struct_array() {
    #[derive(Serialize, Debug)]
    struct Entry(String, u8);

    let d = vec![Entry("a".into(), 1), Entry("bc".into(), 2)];

    let expected = "
0000000000000000000000000000000000000000000000000000000000000020 // d offset
    0000000000000000000000000000000000000000000000000000000000000002 // d length
    0000000000000000000000000000000000000000000000000000000000000040 // d[0] offset
    00000000000000000000000000000000000000000000000000000000000000c0 // d[1] offset
        0000000000000000000000000000000000000000000000000000000000000040 // d[0].0 offset
        0000000000000000000000000000000000000000000000000000000000000001 // d[0].1
            0000000000000000000000000000000000000000000000000000000000000001 // d[0].0 length
            6100000000000000000000000000000000000000000000000000000000000000 // d[0].0

        0000000000000000000000000000000000000000000000000000000000000040 // d[1].0 offset
        0000000000000000000000000000000000000000000000000000000000000002 // d[1].1
            0000000000000000000000000000000000000000000000000000000000000002 // d[1].0 length
            6263000000000000000000000000000000000000000000000000000000000000 // d[1].0
    ";
    serialize_and_compare(&d, expected);
}
