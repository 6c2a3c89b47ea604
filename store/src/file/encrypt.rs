//! Standard security handler, revision 2, 3 and 4.
use super::{FileError, FileResult};
use crate::{
    filter::FilterRegistry,
    object::{Dictionary, Name, Object, ObjectId, PdfString, Stream},
};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use bitflags::bitflags;
use log::{error, info};
use md5::{Digest, Md5};
use rand::RngCore;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub(crate) const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

const AES_SALT: &[u8] = b"sAlT";
const AES_BLOCK: usize = 16;
/// Reserved bits of `P` that must be 1.
const RESERVED_PERMISSION_BITS: u32 = 0xFFFF_F0C0;

bitflags! {
    /// User access permissions, `P` entry of encrypt dictionary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const PRINT = 0x4;
        const MODIFY = 0x8;
        const COPY = 0x10;
        const ANNOTATE = 0x20;
        const FILL_FORMS = 0x100;
        const ASSEMBLE = 0x400;
        const PRINT_HIGH_QUALITY = 0x800;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

impl Permissions {
    /// Value of `P` entry, reserved bits set.
    pub fn to_p(self) -> i32 {
        (RESERVED_PERMISSION_BITS | self.bits()) as i32
    }
}

/// Which password opened the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Authorization {
    /// Document not encrypted.
    #[default]
    None,
    User,
    Owner,
}

/// Cipher used when saving encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cipher {
    Rc4,
    #[default]
    Aes128,
}

/// Encryption settings of `SaveOptions`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncryptionOptions {
    pub user_password: String,
    /// Same as user password if not set.
    pub owner_password: Option<String>,
    pub cipher: Cipher,
    pub permissions: Permissions,
}

impl EncryptionOptions {
    pub fn new(user_password: impl Into<String>) -> Self {
        Self {
            user_password: user_password.into(),
            ..Default::default()
        }
    }

    pub fn owner_password(mut self, password: impl Into<String>) -> Self {
        self.owner_password = Some(password.into());
        self
    }

    pub fn cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StandardHandlerRevision {
    V2 = 2,
    V3 = 3,
    V4 = 4,
}

impl TryFrom<i64> for StandardHandlerRevision {
    type Error = FileError;

    fn try_from(r: i64) -> Result<Self, Self::Error> {
        match r {
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            _ => Err(FileError::UnsupportedFeature(format!(
                "standard security handler revision {r}"
            ))),
        }
    }
}

/// Cipher applied to strings or streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CryptMethod {
    Identity,
    Rc4,
    Aes,
}

fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut h = Md5::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

pub(crate) fn pad_trunc_password(password: &[u8]) -> [u8; 32] {
    let mut r = PADDING;
    let n = password.len().min(32);
    r[..n].copy_from_slice(&password[..n]);
    r[n..].copy_from_slice(&PADDING[..32 - n]);
    r
}

fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut r = data.to_vec();
    arc4::Arc4::with_key(key).encrypt(&mut r);
    r
}

/// Rc4 encrypt `data` once per round, round `i` uses `key` xor `i`.
fn rc4_cascade(key: &[u8], mut data: Vec<u8>, rounds: impl Iterator<Item = u8>) -> Vec<u8> {
    let mut round_key = vec![0u8; key.len()];
    for i in rounds {
        for (k, b) in round_key.iter_mut().zip(key) {
            *k = b ^ i;
        }
        data = rc4(&round_key, &data);
    }
    data
}

fn key_bytes(revision: StandardHandlerRevision, key_length: usize) -> usize {
    if revision == StandardHandlerRevision::V2 {
        5
    } else {
        key_length
    }
}

/// Document key derived from user password. `key_length` in bytes.
pub(crate) fn calc_encrypt_key(
    revision: StandardHandlerRevision,
    key_length: usize,
    user_password: &[u8],
    owner_hash: &[u8],
    p: u32,
    doc_id: &[u8],
    encrypt_metadata: bool,
) -> Vec<u8> {
    let n = key_bytes(revision, key_length);
    let padded = pad_trunc_password(user_password);
    let p = p.to_le_bytes();
    let no_metadata: &[u8] =
        if revision >= StandardHandlerRevision::V4 && !encrypt_metadata {
            &[0xff; 4]
        } else {
            &[]
        };
    let mut digest = md5(&[&padded, &owner_hash[..32], &p, doc_id, no_metadata]);
    if revision >= StandardHandlerRevision::V3 {
        for _ in 0..50 {
            digest = md5(&[&digest[..n]]);
        }
    }
    digest[..n].to_vec()
}

/// Rc4 key derived from owner password, used to compute and reverse `O`.
fn owner_key(revision: StandardHandlerRevision, key_length: usize, owner_password: &[u8]) -> Vec<u8> {
    let n = key_bytes(revision, key_length);
    let mut digest = md5(&[&pad_trunc_password(owner_password)]);
    if revision >= StandardHandlerRevision::V3 {
        for _ in 0..50 {
            digest = md5(&[&digest]);
        }
    }
    digest[..n].to_vec()
}

/// Value of `O`, owner password falls back to user password if empty.
pub(crate) fn calc_owner_hash(
    revision: StandardHandlerRevision,
    key_length: usize,
    owner_password: &[u8],
    user_password: &[u8],
) -> Vec<u8> {
    let owner_password = if owner_password.is_empty() {
        user_password
    } else {
        owner_password
    };
    let key = owner_key(revision, key_length, owner_password);
    let r = rc4(&key, &pad_trunc_password(user_password));
    if revision >= StandardHandlerRevision::V3 {
        rc4_cascade(&key, r, 1..=19)
    } else {
        r
    }
}

/// Value of `U`, 32 bytes, revision 3 and later pads 16 bytes hash with zeros.
pub(crate) fn calc_user_hash(revision: StandardHandlerRevision, key: &[u8], doc_id: &[u8]) -> Vec<u8> {
    if revision == StandardHandlerRevision::V2 {
        return rc4(key, &PADDING);
    }

    let digest = md5(&[&PADDING, doc_id]);
    let mut r = rc4_cascade(key, digest.to_vec(), 0..=19);
    r.resize(32, 0);
    r
}

/// Return document key if `password` is the user password.
#[allow(clippy::too_many_arguments)]
pub(crate) fn authorize_user(
    revision: StandardHandlerRevision,
    key_length: usize,
    password: &[u8],
    owner_hash: &[u8],
    user_hash: &[u8],
    p: u32,
    doc_id: &[u8],
    encrypt_metadata: bool,
) -> Option<Vec<u8>> {
    let key = calc_encrypt_key(
        revision,
        key_length,
        password,
        owner_hash,
        p,
        doc_id,
        encrypt_metadata,
    );
    let u = calc_user_hash(revision, &key, doc_id);
    let n = if revision == StandardHandlerRevision::V2 { 32 } else { 16 };
    (u[..n] == user_hash[..n]).then_some(key)
}

/// Recover user password from `O` using owner password.
pub(crate) fn recover_user_password(
    revision: StandardHandlerRevision,
    key_length: usize,
    owner_password: &[u8],
    owner_hash: &[u8],
) -> Vec<u8> {
    let key = owner_key(revision, key_length, owner_password);
    if revision == StandardHandlerRevision::V2 {
        rc4(&key, &owner_hash[..32])
    } else {
        rc4_cascade(&key, owner_hash[..32].to_vec(), (0..=19).rev())
    }
}

/// Key to encrypt/decrypt object `id`.
pub(crate) fn object_key(key: &[u8], id: ObjectId, aes: bool) -> Vec<u8> {
    let num = id.number().to_le_bytes();
    let gen = id.generation().to_le_bytes();
    let salt = if aes { AES_SALT } else { &[] };
    let digest = md5(&[key, &num[..3], &gen, salt]);
    digest[..(key.len() + 5).min(16)].to_vec()
}

fn aes_encrypt(key: &[u8], data: &[u8]) -> FileResult<Vec<u8>> {
    let mut iv = [0u8; AES_BLOCK];
    rand::thread_rng().fill_bytes(&mut iv);
    let cipher = Aes128CbcEnc::new_from_slices(key, &iv)
        .map_err(|e| FileError::Format(format!("AES key error: {e:?}")))?;
    let mut r = vec![0u8; AES_BLOCK + (data.len() / AES_BLOCK + 1) * AES_BLOCK];
    r[..AES_BLOCK].copy_from_slice(&iv);
    let n = cipher
        .encrypt_padded_b2b_mut::<Pkcs7>(data, &mut r[AES_BLOCK..])
        .map_err(|e| FileError::Format(format!("AES encrypt error: {e:?}")))?
        .len();
    r.truncate(AES_BLOCK + n);
    Ok(r)
}

fn aes_decrypt(key: &[u8], data: &[u8]) -> FileResult<Vec<u8>> {
    if data.len() < AES_BLOCK {
        return Ok(vec![]);
    }
    let (iv, data) = data.split_at(AES_BLOCK);
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| FileError::Format(format!("AES key error: {e:?}")))?;
    let mut r = vec![0u8; data.len()];
    let n = cipher
        .decrypt_padded_b2b_mut::<Pkcs7>(data, &mut r)
        .map_err(|e| {
            error!("AES decrypt error: {e:?}");
            FileError::Format(format!("AES decrypt error: {e:?}"))
        })?
        .len();
    r.truncate(n);
    Ok(r)
}

fn string_field<'a>(d: &'a Dictionary, key: &str) -> FileResult<&'a [u8]> {
    d.get_value(key)
        .and_then(Object::opt_string)
        .map(PdfString::as_bytes)
        .filter(|s| s.len() >= 32)
        .ok_or_else(|| FileError::Format(format!("invalid {key} of encrypt dictionary")))
}

/// Crypt method of crypt filter `name` in `CF`, revision 4.
fn crypt_filter_method(d: &Dictionary, name: Option<&Name>) -> FileResult<CryptMethod> {
    let Some(name) = name else {
        return Ok(CryptMethod::Identity);
    };
    if name == "Identity" {
        return Ok(CryptMethod::Identity);
    }
    let cfm = d
        .get_value("CF")
        .and_then(Object::opt_dict)
        .and_then(|cf| cf.get(name))
        .and_then(Object::opt_dict)
        .ok_or_else(|| FileError::Format(format!("crypt filter {name} not defined")))?
        .get_name("CFM")?;
    match cfm.map(Name::as_bytes) {
        None | Some(b"None") => Ok(CryptMethod::Identity),
        Some(b"V2") => Ok(CryptMethod::Rc4),
        Some(b"AESV2") => Ok(CryptMethod::Aes),
        Some(other) => Err(FileError::UnsupportedFeature(format!(
            "crypt filter method {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Decrypts and encrypts strings and streams of a document.
#[derive(Debug, Clone)]
pub struct SecurityHandler {
    key: Vec<u8>,
    stream_method: CryptMethod,
    string_method: CryptMethod,
    encrypt_metadata: bool,
    authorization: Authorization,
    permissions: Permissions,
}

impl SecurityHandler {
    /// Authenticate `password` against encrypt dictionary, as user password
    /// first then as owner password.
    pub fn open(encrypt: &Dictionary, doc_id: &[u8], password: &[u8]) -> FileResult<Self> {
        match encrypt.get_name("Filter")? {
            Some(n) if n == "Standard" => {}
            n => {
                return Err(FileError::UnsupportedFeature(format!(
                    "security handler {:?}",
                    n
                )))
            }
        }
        let v = encrypt.get_int("V", 0)?;
        let revision = StandardHandlerRevision::try_from(encrypt.get_int("R", 0)?)?;
        let (stream_method, string_method, default_bits) = match v {
            1 | 2 => (CryptMethod::Rc4, CryptMethod::Rc4, 40),
            4 => (
                crypt_filter_method(encrypt, encrypt.get_name("StmF")?)?,
                crypt_filter_method(encrypt, encrypt.get_name("StrF")?)?,
                128,
            ),
            _ => {
                return Err(FileError::UnsupportedFeature(format!(
                    "encrypt algorithm V {v}"
                )))
            }
        };
        let bits = if v == 1 {
            40
        } else {
            encrypt.get_int("Length", default_bits)?
        };
        if !(40..=128).contains(&bits) || bits % 8 != 0 {
            return Err(FileError::Format(format!("invalid key length {bits}")));
        }
        let key_length = bits as usize / 8;
        let owner_hash = string_field(encrypt, "O")?;
        let user_hash = string_field(encrypt, "U")?;
        let p = encrypt.get_int("P", 0)? as u32;
        let encrypt_metadata = encrypt.get_bool("EncryptMetadata", true)?;

        let user = |password: &[u8]| {
            authorize_user(
                revision,
                key_length,
                password,
                owner_hash,
                user_hash,
                p,
                doc_id,
                encrypt_metadata,
            )
        };
        let (key, authorization) = if let Some(key) = user(password) {
            (key, Authorization::User)
        } else {
            let user_password = recover_user_password(revision, key_length, password, owner_hash);
            let key = user(&user_password).ok_or(FileError::Authentication)?;
            (key, Authorization::Owner)
        };
        info!("document authorized as {authorization:?}, revision {revision:?}");

        Ok(Self {
            key,
            stream_method,
            string_method,
            encrypt_metadata,
            authorization,
            permissions: if authorization == Authorization::Owner {
                Permissions::all()
            } else {
                Permissions::from_bits_truncate(p)
            },
        })
    }

    /// Handler and encrypt dictionary for a document to be saved encrypted,
    /// always revision 4 with 128 bits key.
    pub fn create(options: &EncryptionOptions, doc_id: &[u8]) -> FileResult<(Self, Dictionary)> {
        let user_password = options.user_password.as_str();
        let owner_password = options.owner_password.as_deref().unwrap_or_default();
        if !user_password.is_ascii() || !owner_password.is_ascii() {
            return Err(FileError::InvalidPassword);
        }

        let revision = StandardHandlerRevision::V4;
        let key_length = 16;
        let p = options.permissions.to_p();
        let owner_hash = calc_owner_hash(
            revision,
            key_length,
            owner_password.as_bytes(),
            user_password.as_bytes(),
        );
        let key = calc_encrypt_key(
            revision,
            key_length,
            user_password.as_bytes(),
            &owner_hash,
            p as u32,
            doc_id,
            true,
        );
        let user_hash = calc_user_hash(revision, &key, doc_id);

        let (method, cfm) = match options.cipher {
            Cipher::Rc4 => (CryptMethod::Rc4, "V2"),
            Cipher::Aes128 => (CryptMethod::Aes, "AESV2"),
        };
        let std_cf = Dictionary::new()
            .with("CFM", Name::from(cfm))
            .with("AuthEvent", Name::from("DocOpen"))
            .with("Length", 16);
        let d = Dictionary::new()
            .with("Filter", Name::from("Standard"))
            .with("V", 4)
            .with("R", 4)
            .with("Length", 128)
            .with("O", PdfString::new(owner_hash))
            .with("U", PdfString::new(user_hash))
            .with("P", p)
            .with("CF", Dictionary::new().with("StdCF", std_cf))
            .with("StmF", Name::from("StdCF"))
            .with("StrF", Name::from("StdCF"));

        Ok((
            Self {
                key,
                stream_method: method,
                string_method: method,
                encrypt_metadata: true,
                authorization: Authorization::Owner,
                permissions: options.permissions,
            },
            d,
        ))
    }

    pub fn authorization(&self) -> Authorization {
        self.authorization
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    fn apply(
        &self,
        method: CryptMethod,
        id: ObjectId,
        data: &[u8],
        encrypt: bool,
    ) -> FileResult<Vec<u8>> {
        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => Ok(rc4(&object_key(&self.key, id, false), data)),
            CryptMethod::Aes => {
                let key = object_key(&self.key, id, true);
                if encrypt {
                    aes_encrypt(&key, data)
                } else {
                    aes_decrypt(&key, data)
                }
            }
        }
    }

    pub fn decrypt_string(&self, id: ObjectId, data: &[u8]) -> FileResult<Vec<u8>> {
        self.apply(self.string_method, id, data, false)
    }

    pub fn encrypt_string(&self, id: ObjectId, data: &[u8]) -> FileResult<Vec<u8>> {
        self.apply(self.string_method, id, data, true)
    }

    pub fn decrypt_stream(&self, id: ObjectId, data: &[u8]) -> FileResult<Vec<u8>> {
        self.apply(self.stream_method, id, data, false)
    }

    pub fn encrypt_stream(&self, id: ObjectId, data: &[u8]) -> FileResult<Vec<u8>> {
        self.apply(self.stream_method, id, data, true)
    }

    /// Decrypt strings and stream data nested in object `id`.
    pub fn decrypt_object(&self, id: ObjectId, o: &mut Object) -> FileResult<()> {
        Crypter {
            handler: self,
            id,
            direction: Direction::Decrypt,
        }
        .object(o)
    }

    /// Encrypt strings and stream data nested in object `id`, streams are
    /// encoded by their filters first.
    pub fn encrypt_object(
        &self,
        id: ObjectId,
        o: &mut Object,
        filters: &FilterRegistry,
    ) -> FileResult<()> {
        Crypter {
            handler: self,
            id,
            direction: Direction::Encrypt(filters),
        }
        .object(o)
    }
}

#[derive(Clone, Copy)]
enum Direction<'a> {
    Decrypt,
    Encrypt(&'a FilterRegistry),
}

/// Walks object tree, applies cipher to strings and stream data.
struct Crypter<'a> {
    handler: &'a SecurityHandler,
    id: ObjectId,
    direction: Direction<'a>,
}

impl<'a> Crypter<'a> {
    fn string(&self, s: &mut PdfString) -> FileResult<()> {
        let data = match self.direction {
            Direction::Decrypt => self.handler.decrypt_string(self.id, s.as_bytes())?,
            Direction::Encrypt(_) => self.handler.encrypt_string(self.id, s.as_bytes())?,
        };
        *s = PdfString::new(data);
        Ok(())
    }

    fn dict(&self, d: &mut Dictionary) -> FileResult<()> {
        d.values_mut().try_for_each(|v| self.object(v))
    }

    fn stream(&self, s: &mut Stream) -> FileResult<()> {
        self.dict(s.dict_mut())?;
        if !self.handler.encrypt_metadata && s.dict().is_type("Metadata") {
            return Ok(());
        }
        let data = match self.direction {
            Direction::Decrypt => match s.raw() {
                Some(raw) => self.handler.decrypt_stream(self.id, raw)?,
                None => return Ok(()),
            },
            Direction::Encrypt(filters) => {
                self.handler.encrypt_stream(self.id, s.encoded(filters)?)?
            }
        };
        s.set_encoded(data);
        Ok(())
    }

    fn object(&self, o: &mut Object) -> FileResult<()> {
        match o {
            Object::String(s) => self.string(s),
            Object::Array(arr) => arr.iter_mut().try_for_each(|v| self.object(v)),
            Object::Dictionary(d) => self.dict(d),
            Object::Stream(s) => self.stream(s),
            _ => Ok(()),
        }
    }
}
