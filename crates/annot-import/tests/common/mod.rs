#![allow(dead_code)]

use annot_import::UploadedFile;

/// `Turn_ID,User,Message` file with `rows` good rows.
pub fn chat_csv(rows: usize) -> Vec<u8> {
    let mut out = String::from("Turn_ID,User,Message\n");
    for n in 1..=rows {
        out.push_str(&format!("{n},user{},message {n}\n", n % 3));
    }
    out.into_bytes()
}

/// Ten data rows, of which rows 3 and 7 carry a non-UTF-8 message.
pub fn ten_rows_two_bad() -> Vec<u8> {
    let mut out = b"Turn_ID,User,Message\n".to_vec();
    for n in 1..=10 {
        out.extend_from_slice(format!("{n},alice,").as_bytes());
        if n == 3 || n == 7 {
            out.extend_from_slice(&[0xc3, 0x28]);
        } else {
            out.extend_from_slice(format!("hello {n}").as_bytes());
        }
        out.push(b'\n');
    }
    out
}

pub fn upload(bytes: &[u8]) -> UploadedFile {
    UploadedFile::from_bytes("chat.csv", bytes).expect("spool upload")
}
