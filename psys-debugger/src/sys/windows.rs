//! The native backend over the Windows debugging and debug-help APIs.
//!
//! Only compiled for x86-64 Windows targets; everything else uses the
//! `unsupported` sibling module.

use std::collections::HashMap;
use std::mem;
use std::path::PathBuf;
use std::ptr;
use std::slice;

use tracing::debug;

use winapi::shared::basetsd::{DWORD64, PDWORD64, SIZE_T};
use winapi::shared::minwindef::{DWORD, FALSE, LPVOID, PDWORD, TRUE};
use winapi::shared::ntstatus::{DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED};
use winapi::shared::winerror::ERROR_NOT_ALL_ASSIGNED;
use winapi::um::dbghelp::{
    AddrModeFlat, StackWalk64, SymCleanup, SymFunctionTableAccess64, SymGetModuleBase64,
    SymInitializeW, IMAGEHLP_LINEW64, PIMAGEHLP_LINEW64, PSYMBOL_INFOW, STACKFRAME64,
    SYMBOL_INFOW, SYMOPT_DEFERRED_LOADS, SYMOPT_FAIL_CRITICAL_ERRORS, SYMOPT_NO_PROMPTS,
    SYMOPT_UNDNAME,
};
use winapi::um::debugapi::{
    ContinueDebugEvent, DebugActiveProcess, DebugActiveProcessStop, DebugSetProcessKillOnExit,
    WaitForDebugEvent,
};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::fileapi::GetFinalPathNameByHandleW;
use winapi::um::memoryapi::ReadProcessMemory;
use winapi::um::minwinbase::{
    CREATE_PROCESS_DEBUG_EVENT, CREATE_THREAD_DEBUG_EVENT, DEBUG_EVENT, EXCEPTION_DEBUG_EVENT,
    EXIT_PROCESS_DEBUG_EVENT, EXIT_THREAD_DEBUG_EVENT, LOAD_DLL_DEBUG_EVENT,
    OUTPUT_DEBUG_STRING_EVENT, OUTPUT_DEBUG_STRING_INFO, RIP_EVENT, UNLOAD_DLL_DEBUG_EVENT,
};
use winapi::um::processthreadsapi::{GetCurrentProcess, GetThreadContext, OpenProcessToken};
use winapi::um::winbase::{LookupPrivilegeValueW, INFINITE};
use winapi::um::securitybaseapi::AdjustTokenPrivileges;
use winapi::um::winnt::{
    CONTEXT, CONTEXT_FULL, HANDLE, IMAGE_FILE_MACHINE_AMD64, LUID, LUID_AND_ATTRIBUTES,
    SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
};

use psys_common::{Addr, Handle, ProcessId, SharedHandle, Symbol, ThreadId};

use crate::error::DebugError;
use crate::event::{
    ContinueStatus, DebugEvent as Event, DllLoadedEvent, ExceptionEvent, ProcessCreatedEvent,
    ThreadCreatedEvent,
};
use crate::symbols::{SourceLocation, SymbolService};
use crate::sys::{DebugPort, FrameCursor, Unwind};

// Not defined in winapi.
#[allow(non_snake_case)]
extern "system" {
    fn SymGetOptions() -> DWORD;
    fn SymSetOptions(options: DWORD) -> DWORD;
    fn SymFromAddrW(
        hProcess: HANDLE,
        Address: DWORD64,
        Displacement: PDWORD64,
        Symbol: PSYMBOL_INFOW,
    ) -> i32;
    fn SymGetLineFromAddrW64(
        hProcess: HANDLE,
        dwAddr: DWORD64,
        pdwDisplacement: PDWORD,
        Line: PIMAGEHLP_LINEW64,
    ) -> i32;
}

const MAX_SYM_NAME_LEN: usize = 2048;

// Magic line numbers the debugger uses for compiler-generated code.
const STEP_LINE_OVER: u32 = 0x00F0_0F00;
const STEP_LINE_THRU: u32 = 0x00FE_EFEE;

#[repr(C, align(16))]
struct Aligned16<T>(T);

fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

unsafe fn wide_cstr(mut ptr: *const u16) -> String {
    let mut buf = Vec::new();
    while !ptr.is_null() && *ptr != 0 {
        buf.push(*ptr);
        ptr = ptr.add(1);
    }
    String::from_utf16_lossy(&buf)
}

fn path_from_handle(handle: HANDLE) -> Option<PathBuf> {
    if handle.is_null() {
        return None;
    }

    let mut buf = [0u16; 1024];
    let len =
        unsafe { GetFinalPathNameByHandleW(handle, buf.as_mut_ptr(), buf.len() as DWORD, 0) };
    if len == 0 || len as usize >= buf.len() {
        return None;
    }

    let path = String::from_utf16_lossy(&buf[..len as usize]);
    Some(PathBuf::from(path.trim_start_matches(r"\\?\")))
}

/// The debug port over `DebugActiveProcess` and the debug-event queue.
pub struct DebugApiPort {
    processes: HashMap<ProcessId, SharedHandle>,
}

impl DebugApiPort {
    /// Opens the debug port.
    pub fn new() -> Result<Self, DebugError> {
        Ok(DebugApiPort {
            processes: HashMap::new(),
        })
    }

    fn read_debug_string(&self, pid: ProcessId, info: &OUTPUT_DEBUG_STRING_INFO) -> String {
        let process = match self.processes.get(&pid) {
            Some(process) => process,
            None => return String::new(),
        };

        let chars = info.nDebugStringLength as usize;
        if chars == 0 {
            return String::new();
        }

        let char_size = if info.fUnicode != 0 { 2 } else { 1 };
        let mut buf = vec![0u8; chars * char_size];
        let mut read: SIZE_T = 0;
        let ok = unsafe {
            ReadProcessMemory(
                process.raw().cast(),
                info.lpDebugStringData as *const _,
                buf.as_mut_ptr() as LPVOID,
                buf.len(),
                &mut read,
            )
        };
        if ok == 0 {
            return String::new();
        }
        buf.truncate(read);

        let message = if info.fUnicode != 0 {
            let wide: Vec<u16> = buf
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&wide)
        } else {
            String::from_utf8_lossy(&buf).into_owned()
        };

        message.trim_end_matches('\0').to_string()
    }

    /// Decodes one raw debug event, or `None` for codes we do not model.
    unsafe fn decode(&mut self, raw: &DEBUG_EVENT) -> Option<Event> {
        let pid = ProcessId(raw.dwProcessId);
        let tid = ThreadId(raw.dwThreadId);

        match raw.dwDebugEventCode {
            CREATE_PROCESS_DEBUG_EVENT => {
                let info = raw.u.CreateProcessInfo();
                let image_path = path_from_handle(info.hFile);
                if !info.hFile.is_null() {
                    // The debugger owns the file handle and must close it.
                    drop(Handle::from_raw(info.hFile.cast()));
                }

                // Process and thread handles are closed by the system when
                // the exit-process event is continued.
                let process_handle = Handle::borrowed(info.hProcess.cast()).into_shared();
                let thread_handle = Handle::borrowed(info.hThread.cast()).into_shared();
                self.processes.insert(pid, process_handle.clone());

                Some(Event::ProcessCreated(ProcessCreatedEvent {
                    pid,
                    tid,
                    process_handle,
                    thread_handle,
                    image_base: Addr(info.lpBaseOfImage as u64),
                    image_path,
                    start_address: Addr(
                        info.lpStartAddress.map_or(0, |start| start as usize as u64),
                    ),
                    local_base: Addr(info.lpThreadLocalBase as u64),
                }))
            }
            EXIT_PROCESS_DEBUG_EVENT => {
                let info = raw.u.ExitProcess();
                self.processes.remove(&pid);
                Some(Event::ProcessExited {
                    pid,
                    tid,
                    exit_code: info.dwExitCode,
                })
            }
            CREATE_THREAD_DEBUG_EVENT => {
                let info = raw.u.CreateThread();
                Some(Event::ThreadCreated(ThreadCreatedEvent {
                    pid,
                    tid,
                    handle: Handle::borrowed(info.hThread.cast()).into_shared(),
                    start_address: Addr(
                        info.lpStartAddress.map_or(0, |start| start as usize as u64),
                    ),
                    local_base: Addr(info.lpThreadLocalBase as u64),
                }))
            }
            EXIT_THREAD_DEBUG_EVENT => {
                let info = raw.u.ExitThread();
                Some(Event::ThreadExited {
                    pid,
                    tid,
                    exit_code: info.dwExitCode,
                })
            }
            LOAD_DLL_DEBUG_EVENT => {
                let info = raw.u.LoadDll();
                let path = path_from_handle(info.hFile);
                if !info.hFile.is_null() {
                    drop(Handle::from_raw(info.hFile.cast()));
                }

                Some(Event::DllLoaded(DllLoadedEvent {
                    pid,
                    tid,
                    base: Addr(info.lpBaseOfDll as u64),
                    path,
                }))
            }
            UNLOAD_DLL_DEBUG_EVENT => {
                let info = raw.u.UnloadDll();
                Some(Event::DllUnloaded {
                    pid,
                    tid,
                    base: Addr(info.lpBaseOfDll as u64),
                })
            }
            EXCEPTION_DEBUG_EVENT => {
                let info = raw.u.Exception();
                Some(Event::Exception(ExceptionEvent {
                    pid,
                    tid,
                    code: info.ExceptionRecord.ExceptionCode,
                    address: Addr(info.ExceptionRecord.ExceptionAddress as u64),
                    first_chance: info.dwFirstChance != 0,
                }))
            }
            OUTPUT_DEBUG_STRING_EVENT => {
                let info = raw.u.DebugString();
                Some(Event::DebugString {
                    pid,
                    tid,
                    message: self.read_debug_string(pid, info),
                })
            }
            RIP_EVENT => {
                let info = raw.u.RipInfo();
                Some(Event::Rip {
                    pid,
                    tid,
                    error: info.dwError,
                })
            }
            code => {
                debug!(code, "unrecognized debug event");
                None
            }
        }
    }
}

impl DebugPort for DebugApiPort {
    fn attach(&mut self, pid: ProcessId) -> Result<(), DebugError> {
        if unsafe { DebugActiveProcess(pid.0) } == 0 {
            return Err(DebugError::last_os("DebugActiveProcess"));
        }

        // The target must survive our exit.
        if unsafe { DebugSetProcessKillOnExit(FALSE) } == 0 {
            debug!(%pid, "DebugSetProcessKillOnExit failed");
        }

        Ok(())
    }

    fn detach(&mut self, pid: ProcessId) -> Result<(), DebugError> {
        self.processes.remove(&pid);
        if unsafe { DebugActiveProcessStop(pid.0) } == 0 {
            return Err(DebugError::last_os("DebugActiveProcessStop"));
        }
        Ok(())
    }

    fn wait_event(&mut self) -> Result<Event, DebugError> {
        loop {
            let mut raw: DEBUG_EVENT = unsafe { mem::zeroed() };
            if unsafe { WaitForDebugEvent(&mut raw, INFINITE) } == 0 {
                return Err(DebugError::last_os("WaitForDebugEvent"));
            }

            match unsafe { self.decode(&raw) } {
                Some(event) => return Ok(event),
                None => {
                    // Resume and keep waiting for an event we model.
                    unsafe {
                        ContinueDebugEvent(raw.dwProcessId, raw.dwThreadId, DBG_CONTINUE as DWORD)
                    };
                }
            }
        }
    }

    fn continue_event(
        &mut self,
        pid: ProcessId,
        tid: ThreadId,
        status: ContinueStatus,
    ) -> Result<(), DebugError> {
        let code = match status {
            ContinueStatus::Handled => DBG_CONTINUE,
            ContinueStatus::Unhandled => DBG_EXCEPTION_NOT_HANDLED,
        };

        if unsafe { ContinueDebugEvent(pid.0, tid.0, code as DWORD) } == 0 {
            return Err(DebugError::last_os("ContinueDebugEvent"));
        }
        Ok(())
    }
}

/// A thread's register context, captured while the thread is stopped.
pub struct ThreadContext {
    raw: Box<Aligned16<CONTEXT>>,
}

impl ThreadContext {
    /// The instruction pointer.
    pub fn pc(&self) -> Addr {
        Addr(self.raw.0.Rip)
    }

    /// The stack pointer.
    pub fn sp(&self) -> Addr {
        Addr(self.raw.0.Rsp)
    }

    /// The frame pointer.
    pub fn fp(&self) -> Addr {
        Addr(self.raw.0.Rbp)
    }

    /// The register seed for a stack walk, flat addressing.
    pub fn cursor(&self) -> FrameCursor {
        FrameCursor {
            pc: self.pc(),
            sp: self.sp(),
            fp: self.fp(),
        }
    }
}

/// Reads the full register context of a stopped thread.
pub fn thread_context(thread: &SharedHandle) -> Result<ThreadContext, DebugError> {
    let mut raw: Box<Aligned16<CONTEXT>> = Box::new(Aligned16(unsafe { mem::zeroed() }));
    raw.0.ContextFlags = CONTEXT_FULL;

    if unsafe { GetThreadContext(thread.raw().cast(), &mut raw.0) } == 0 {
        return Err(DebugError::last_os("GetThreadContext"));
    }

    Ok(ThreadContext { raw })
}

/// The stack-unwind service over `StackWalk64`.
///
/// The debug-help symbol handler must be initialized for the process (see
/// [`DbghelpSymbolService`]) so the function-table and module-base
/// callbacks can resolve unwind data.
pub struct DbghelpUnwinder {
    process: SharedHandle,
    thread: SharedHandle,
    context: Box<Aligned16<CONTEXT>>,
    frame: STACKFRAME64,
}

impl DbghelpUnwinder {
    /// Prepares a walk of `thread` seeded from its register context.
    pub fn new(
        process: &SharedHandle,
        thread: &SharedHandle,
        context: &ThreadContext,
    ) -> Result<Self, DebugError> {
        let mut frame: STACKFRAME64 = unsafe { mem::zeroed() };
        frame.AddrPC.Offset = context.pc().get();
        frame.AddrPC.Mode = AddrModeFlat;
        frame.AddrStack.Offset = context.sp().get();
        frame.AddrStack.Mode = AddrModeFlat;
        frame.AddrFrame.Offset = context.fp().get();
        frame.AddrFrame.Mode = AddrModeFlat;

        Ok(DbghelpUnwinder {
            process: process.clone(),
            thread: thread.clone(),
            context: Box::new(Aligned16(context.raw.0)),
            frame,
        })
    }
}

impl Unwind for DbghelpUnwinder {
    fn step(&mut self, cursor: &mut FrameCursor) -> Result<bool, DebugError> {
        let ok = unsafe {
            StackWalk64(
                IMAGE_FILE_MACHINE_AMD64 as DWORD,
                self.process.raw().cast(),
                self.thread.raw().cast(),
                &mut self.frame,
                &mut self.context.0 as *mut CONTEXT as LPVOID,
                None,
                Some(SymFunctionTableAccess64),
                Some(SymGetModuleBase64),
                None,
            )
        };

        if ok == 0 {
            return Ok(false);
        }

        cursor.pc = Addr(self.frame.AddrPC.Offset);
        cursor.sp = Addr(self.frame.AddrStack.Offset);
        cursor.fp = Addr(self.frame.AddrFrame.Offset);
        Ok(true)
    }
}

/// The in-memory symbolication service over the debug-help library.
///
/// Initializing the service invades the target's module list; cleanup
/// happens on drop.
pub struct DbghelpSymbolService {
    process: SharedHandle,
}

impl DbghelpSymbolService {
    /// Initializes the symbol handler for an attached process.
    pub fn new(process: &SharedHandle) -> Result<Self, DebugError> {
        unsafe {
            SymSetOptions(
                SymGetOptions()
                    | SYMOPT_UNDNAME
                    | SYMOPT_DEFERRED_LOADS
                    | SYMOPT_FAIL_CRITICAL_ERRORS
                    | SYMOPT_NO_PROMPTS,
            );

            if SymInitializeW(process.raw().cast(), ptr::null(), TRUE) == 0 {
                return Err(DebugError::last_os("SymInitialize"));
            }
        }

        Ok(DbghelpSymbolService {
            process: process.clone(),
        })
    }
}

impl SymbolService for DbghelpSymbolService {
    fn find_symbol(&self, addr: Addr) -> Result<Option<Symbol>, DebugError> {
        #[repr(C, align(8))]
        struct SymbolBuffer([u8; mem::size_of::<SYMBOL_INFOW>() + MAX_SYM_NAME_LEN * 2]);

        let mut buffer: SymbolBuffer = unsafe { mem::zeroed() };
        // The name characters live directly behind the fixed-size struct.
        let info = unsafe { &mut *(buffer.0.as_mut_ptr() as *mut SYMBOL_INFOW) };
        info.SizeOfStruct = mem::size_of::<SYMBOL_INFOW>() as DWORD;
        info.MaxNameLen = MAX_SYM_NAME_LEN as DWORD;

        let mut displacement: DWORD64 = 0;
        let ok = unsafe { SymFromAddrW(self.process.raw().cast(), addr.get(), &mut displacement, info) };
        if ok == 0 {
            return Ok(None);
        }

        let len = (info.NameLen as usize).min(MAX_SYM_NAME_LEN - 1);
        let name = unsafe { slice::from_raw_parts(info.Name.as_ptr() as *const u16, len) };

        Ok(Some(Symbol::new(
            Addr(info.Address),
            displacement,
            String::from_utf16_lossy(name),
        )))
    }

    fn find_line(&self, addr: Addr) -> Result<Option<SourceLocation>, DebugError> {
        let mut line: IMAGEHLP_LINEW64 = unsafe { mem::zeroed() };
        line.SizeOfStruct = mem::size_of::<IMAGEHLP_LINEW64>() as DWORD;
        let mut displacement: DWORD = 0;

        let ok = unsafe {
            SymGetLineFromAddrW64(self.process.raw().cast(), addr.get(), &mut displacement, &mut line)
        };
        if ok == 0 {
            return Ok(None);
        }

        if line.LineNumber == STEP_LINE_OVER || line.LineNumber == STEP_LINE_THRU {
            return Ok(None);
        }

        Ok(Some(SourceLocation {
            file: unsafe { wide_cstr(line.FileName) },
            line: line.LineNumber,
        }))
    }
}

impl Drop for DbghelpSymbolService {
    fn drop(&mut self) {
        unsafe {
            SymCleanup(self.process.raw().cast());
        }
    }
}

/// Raises the calling process's privileges to debug system processes.
pub fn enable_debug_privilege() -> Result<(), DebugError> {
    unsafe {
        let mut raw_token: HANDLE = ptr::null_mut();
        if OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut raw_token,
        ) == 0
        {
            return Err(DebugError::last_os("OpenProcessToken"));
        }
        let _token = Handle::from_raw(raw_token.cast());

        let mut luid: LUID = mem::zeroed();
        let name = to_wide("SeDebugPrivilege");
        if LookupPrivilegeValueW(ptr::null(), name.as_ptr(), &mut luid) == 0 {
            return Err(DebugError::last_os("LookupPrivilegeValue"));
        }

        let mut privileges: TOKEN_PRIVILEGES = mem::zeroed();
        privileges.PrivilegeCount = 1;
        privileges.Privileges[0] = LUID_AND_ATTRIBUTES {
            Luid: luid,
            Attributes: SE_PRIVILEGE_ENABLED,
        };

        if AdjustTokenPrivileges(
            raw_token,
            FALSE,
            &mut privileges,
            0,
            ptr::null_mut(),
            ptr::null_mut(),
        ) == 0
        {
            return Err(DebugError::last_os("AdjustTokenPrivileges"));
        }

        // The call succeeds even when it assigned nothing.
        if GetLastError() == ERROR_NOT_ALL_ASSIGNED {
            return Err(DebugError::Os {
                code: ERROR_NOT_ALL_ASSIGNED as i32,
                context: "AdjustTokenPrivileges",
            });
        }
    }

    Ok(())
}
