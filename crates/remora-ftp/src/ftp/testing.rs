//! A scripted FTP server on a loopback listener, serving an in-memory tree.
//! Every control line it receives is recorded for assertions.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub const PASSWORD: &str = "secret";
pub const CLOSED: &str = "<closed>";

#[derive(Default)]
struct Tree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Clone)]
pub struct ScriptedServer {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<String>>>,
    tree: Arc<Mutex<Tree>>,
    mlsd: bool,
}

impl ScriptedServer {
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// `mlsd = false` hides MLSD from FEAT so clients fall back to LIST.
    pub async fn start_with(mlsd: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut tree = Tree::default();
        tree.dirs.insert("/".into());
        let server = Self {
            addr: listener.local_addr().unwrap(),
            accepted: Arc::new(AtomicUsize::new(0)),
            commands: Arc::new(Mutex::new(Vec::new())),
            tree: Arc::new(Mutex::new(tree)),
            mlsd,
        };
        let handle = server.clone();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                handle.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle.clone().serve(sock));
            }
        });
        server
    }

    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        self.tree.lock().unwrap().files.insert(path.into(), bytes.to_vec());
    }

    pub fn put_dir(&self, path: &str) {
        self.tree.lock().unwrap().dirs.insert(path.into());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.tree.lock().unwrap().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.tree.lock().unwrap().dirs.contains(path)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Wait until `n` control connections have ended.
    pub async fn wait_closed(&self, n: usize) {
        for _ in 0..200 {
            if self.commands().iter().filter(|c| *c == CLOSED).count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("control connections did not close: {:?}", self.commands());
    }

    fn listing(&self, dir: &str) -> Option<String> {
        let tree = self.tree.lock().unwrap();
        if !tree.dirs.contains(dir) {
            return None;
        }
        let mut out = String::from("type=cdir;modify=20260101000000; .\r\n");
        for d in tree.dirs.iter().filter(|d| *d != "/" && parent_of(d) == dir) {
            out.push_str(&format!("type=dir;modify=20260101000000; {}\r\n", name_of(d)));
        }
        for (f, bytes) in tree.files.iter().filter(|(f, _)| parent_of(f) == dir) {
            out.push_str(&format!(
                "type=file;size={};modify=20260102030405; {}\r\n",
                bytes.len(),
                name_of(f)
            ));
        }
        Some(out)
    }

    fn delete_file(&self, path: &str) -> String {
        match self.tree.lock().unwrap().files.remove(path) {
            Some(_) => "250 Deleted".into(),
            None => "550 No such file".into(),
        }
    }

    fn remove_dir(&self, path: &str) -> String {
        if self.tree.lock().unwrap().dirs.remove(path) {
            "250 Removed".into()
        } else {
            "550 No such directory".into()
        }
    }

    fn make_dir(&self, path: &str) -> String {
        let mut tree = self.tree.lock().unwrap();
        if tree.dirs.contains(path) {
            "550 Create directory operation failed.".into()
        } else {
            tree.dirs.insert(path.into());
            format!("257 \"{}\" created", path)
        }
    }

    fn move_file(&self, from: &str, to: &str) -> String {
        let mut tree = self.tree.lock().unwrap();
        match tree.files.remove(from) {
            Some(bytes) => {
                tree.files.insert(to.into(), bytes);
                "250 Rename successful".into()
            }
            None => "550 No such file".into(),
        }
    }

    async fn serve(self, sock: TcpStream) {
        let (rd, mut wr) = sock.into_split();
        let mut lines = BufReader::new(rd).lines();
        let _ = wr.write_all(b"220 remora scripted server\r\n").await;
        let mut passive: Option<TcpListener> = None;
        let mut rename_from: Option<String> = None;
        let mut cwd = "/".to_string();

        while let Ok(Some(line)) = lines.next_line().await {
            self.commands.lock().unwrap().push(line.clone());
            let (verb, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let arg = arg.to_string();
            let reply: String = match verb.to_ascii_uppercase().as_str() {
                "USER" => "331 Password required".into(),
                "PASS" if arg == PASSWORD => "230 Logged in".into(),
                "PASS" => "530 Login incorrect.".into(),
                "FEAT" if self.mlsd => "211-Features:\r\n MLSD\r\n SIZE\r\n UTF8\r\n211 End".into(),
                "FEAT" => "211-Features:\r\n SIZE\r\n211 End".into(),
                "OPTS" | "TYPE" | "NOOP" => "200 OK".into(),
                "PWD" => "257 \"/\" is the current directory".into(),
                "CWD" => {
                    if self.has_dir(&arg) {
                        cwd = arg.clone();
                        "250 Directory changed".into()
                    } else {
                        "550 No such directory".into()
                    }
                }
                "PASV" => {
                    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    let port = l.local_addr().unwrap().port();
                    passive = Some(l);
                    format!("227 Entering Passive Mode (127,0,0,1,{},{})", port / 256, port % 256)
                }
                "MLSD" | "LIST" => {
                    let dir = if arg.is_empty() { cwd.clone() } else { arg.clone() };
                    match (self.listing(&dir), passive.take()) {
                        (Some(body), Some(l)) => {
                            let _ = wr.write_all(b"150 Listing\r\n").await;
                            let (mut data, _) = l.accept().await.unwrap();
                            let body = if verb.eq_ignore_ascii_case("LIST") {
                                to_unix_listing(&body)
                            } else {
                                body
                            };
                            let _ = data.write_all(body.as_bytes()).await;
                            drop(data);
                            "226 Transfer complete".into()
                        }
                        _ => "550 No such directory".into(),
                    }
                }
                "SIZE" => match self.file(&arg) {
                    Some(b) => format!("213 {}", b.len()),
                    None => "550 No such file".into(),
                },
                "RETR" => match (self.file(&arg), passive.take()) {
                    (Some(bytes), Some(l)) => {
                        let _ = wr.write_all(b"150 Opening BINARY mode data connection\r\n").await;
                        let (mut data, _) = l.accept().await.unwrap();
                        let _ = data.write_all(&bytes).await;
                        drop(data);
                        "226 Transfer complete".into()
                    }
                    _ => "550 No such file or directory".into(),
                },
                "STOR" => match passive.take() {
                    Some(l) => {
                        let _ = wr.write_all(b"150 Ok to send data\r\n").await;
                        let (mut data, _) = l.accept().await.unwrap();
                        let mut bytes = Vec::new();
                        let _ = data.read_to_end(&mut bytes).await;
                        self.put_file(&arg, &bytes);
                        "226 Transfer complete".into()
                    }
                    None => "425 Use PASV first".into(),
                },
                "DELE" => self.delete_file(&arg),
                "RMD" => self.remove_dir(&arg),
                "MKD" => self.make_dir(&arg),
                "RNFR" => {
                    if self.file(&arg).is_some() {
                        rename_from = Some(arg.clone());
                        "350 Ready for RNTO".into()
                    } else {
                        "550 No such file".into()
                    }
                }
                "RNTO" => match rename_from.take() {
                    Some(from) => self.move_file(&from, &arg),
                    None => "503 RNFR required first".into(),
                },
                "QUIT" => {
                    let _ = wr.write_all(b"221 Goodbye\r\n").await;
                    break;
                }
                _ => "502 Command not implemented".into(),
            };
            if wr.write_all(format!("{}\r\n", reply).as_bytes()).await.is_err() {
                break;
            }
        }
        self.commands.lock().unwrap().push(CLOSED.into());
    }
}

/// Render the MLSD body as `ls -l` lines for the LIST path.
fn to_unix_listing(mlsd: &str) -> String {
    let mut out = String::new();
    for line in mlsd.lines() {
        let Some((facts, name)) = line.split_once(' ') else {
            continue;
        };
        if facts.contains("type=cdir") {
            continue;
        }
        let size = facts
            .split(';')
            .find_map(|f| f.strip_prefix("size="))
            .unwrap_or("0");
        let mode = if facts.contains("type=dir") { "drwxr-xr-x" } else { "-rw-r--r--" };
        out.push_str(&format!("{} 1 ftp ftp {} Jan  2  2026 {}\r\n", mode, size, name));
    }
    out
}
