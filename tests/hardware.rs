//! Tests against a real PC/SC reader
//!
//! Run with a reader attached and a card inserted:
//!
//! ```text
//! cargo test --features pcsc --test hardware -- --ignored
//! ```

#![cfg(feature = "pcsc")]

use cardlink::apdu::APDU;
use cardlink::fs::{enumerate, EnumerateOptions, Path};
use cardlink::reader::pcsc::PcscTransport;
use cardlink::reader::CardPresence;
use cardlink::{Config, Context};

fn context() -> Context {
    let transport = PcscTransport::establish().expect("PC/SC daemon not reachable");
    Context::establish(&Config::default(), Box::new(transport)).unwrap()
}

#[test]
#[ignore = "needs a PC/SC reader"]
fn test_list_readers() {
    let ctx = context();
    for (i, name) in ctx.readers().iter().enumerate() {
        println!("{} - {}", i, name);
    }
}

#[test]
#[ignore = "needs a PC/SC reader with a card"]
fn test_connect_and_select_mf() {
    let mut ctx = context();
    assert!(!ctx.readers().is_empty(), "no readers attached");
    assert_eq!(ctx.detect_card(0).unwrap(), CardPresence::Present);

    let mut card = ctx.connect(0).unwrap();
    println!("Driver: {}", card.driver().name());
    assert!(!card.atr().is_empty());

    let resp = card
        .transmit(&APDU::new(0x00, 0xA4, 0x00, 0x00).with_data(vec![0x3F, 0x00]))
        .unwrap();
    println!("SELECT MF: {:02X}{:02X}", resp.sw1, resp.sw2);
    card.disconnect().unwrap();
}

#[test]
#[ignore = "needs a PC/SC reader with a card"]
fn test_enumerate_card() {
    let mut ctx = context();
    ctx.detect_card(0).unwrap();
    let mut card = ctx.connect(0).unwrap();
    let tree = enumerate(&mut card, &Path::root(), &EnumerateOptions::default());
    for entry in tree.iter() {
        println!("{}{}", "  ".repeat(entry.depth), entry.path);
    }
    assert!(!tree.is_empty());
}
